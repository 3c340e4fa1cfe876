//! DataRouter CLI — the main entry point.
//!
//! Commands:
//! - `ask`          — Single question or interactive session over the data
//! - `capabilities` — List the capabilities the engine may request
//! - `init`         — Write a starter config file
//! - `config`       — Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "datarouter",
    about = "DataRouter — ask questions about tabular data",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question (interactive when no message is given)
    Ask {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// CSV or JSON file to load instead of the configured one
        #[arg(long)]
        data: Option<PathBuf>,

        /// Override the maximum number of engine calls per question
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print each capability call as it happens
        #[arg(long)]
        show_steps: bool,
    },

    /// List registered capabilities and their arguments
    Capabilities {
        /// CSV or JSON file to load instead of the configured one
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Write a starter configuration file
    Init,

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // Logs go to stderr so answers on stdout stay pipeable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Ask {
            message,
            data,
            max_iterations,
            show_steps,
        } => {
            commands::ask::run(commands::ask::AskOptions {
                message,
                data,
                max_iterations,
                show_steps,
            })
            .await?
        }
        Commands::Capabilities { data } => commands::capabilities::run(data).await?,
        Commands::Init => commands::init::run().await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
    }

    Ok(())
}
