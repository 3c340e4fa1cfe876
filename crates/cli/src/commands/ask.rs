//! `datarouter ask` — Single question or interactive session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use datarouter_agent::{CancellationToken, Orchestrator};
use datarouter_config::AppConfig;
use datarouter_core::event::{DomainEvent, EventBus};
use datarouter_core::message::{Conversation, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::setup::Runtime;

pub struct AskOptions {
    pub message: Option<String>,
    pub data: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub show_steps: bool,
}

pub async fn run(options: AskOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max) = options.max_iterations {
        config.orchestrator.max_iterations = max;
        config.validate()?;
    }

    // Local engines don't need a key
    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DATAROUTER_API_KEY   (generic)");
        eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
        eprintln!("    OPENROUTER_API_KEY   (for OpenRouter)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let runtime = Runtime::build(&config, options.data.as_deref())?;
    let event_bus = Arc::new(EventBus::new(config.orchestrator.event_capacity));
    if options.show_steps {
        spawn_step_printer(&event_bus);
    }

    let orchestrator =
        Orchestrator::from_config(runtime.engine, runtime.registry, event_bus, &config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if let Some(message) = options.message {
        let answer = orchestrator.run_cancellable(message, &cancel).await?;
        println!("{answer}");
        return Ok(());
    }

    println!();
    println!("  DataRouter — Interactive Mode");
    println!();
    println!("  Provider:      {}", config.default_provider);
    println!("  Model:         {}", config.default_model);
    println!("  Capabilities:  {}", orchestrator.registry().names().join(", "));
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation: Option<Conversation> = None;

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        // Every question extends the same conversation
        match conversation.as_mut() {
            Some(conv) => conv.append(Message::user(line))?,
            None => conversation = Some(orchestrator.start(line)?),
        }
        let Some(conv) = conversation.as_mut() else {
            continue;
        };

        match orchestrator.drive(conv, &cancel).await {
            Ok(answer) => {
                println!();
                for line in answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn spawn_step_printer(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(step) = describe_step(&event) {
                        eprintln!("{step}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => eprintln!("  ... {skipped} steps not shown"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// One line for a step worth showing, if any.
fn describe_step(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::EngineResponded {
            iteration, requests, ..
        } if *requests > 0 => Some(format!(
            "  [step {iteration}] engine requested {requests} capability call(s)"
        )),
        DomainEvent::CapabilityInvoked {
            capability,
            call_id,
            success,
            duration_ms,
            ..
        } => Some(format!(
            "  [{}] {capability} ({call_id}) in {duration_ms}ms",
            if *success { "ok" } else { "failed" }
        )),
        DomainEvent::InteractionFinished {
            engine_calls,
            outcome,
            ..
        } => Some(format!("  [done] {outcome:?} after {engine_calls} engine call(s)")),
        _ => None,
    }
}
