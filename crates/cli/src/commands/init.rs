//! `datarouter init` — Write a starter configuration.

use std::path::Path;

use datarouter_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    println!("DataRouter — Setup");
    println!("==================\n");

    if write_starter_config(&config_path)? {
        println!("Created config.toml at: {}", config_path.display());
        println!("\nNext steps:");
        println!("  1. Set an API key:  export OPENAI_API_KEY=sk-...");
        println!("  2. Point [data].path at a CSV or JSON file (or pass --data)");
        println!("  3. Ask away:        datarouter ask -m \"What were total sales?\"");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run init.");
    }
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
fn write_starter_config(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
