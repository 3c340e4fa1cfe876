//! `datarouter capabilities` — List what the engine may request.

use std::path::PathBuf;

use datarouter_config::AppConfig;
use datarouter_core::capability::CapabilitySpec;

use super::setup::Runtime;

pub async fn run(data: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::build(&config, data.as_deref())?;

    println!("Registered capabilities");
    println!("=======================");
    for spec in runtime.registry.specs() {
        println!();
        print!("{}", render_spec(&spec));
    }
    Ok(())
}

fn render_spec(spec: &CapabilitySpec) -> String {
    let mut out = format!("  {}\n    {}\n", spec.name, spec.description);
    for field in &spec.input.fields {
        out.push_str(&format!(
            "    - {} ({}{}): {}\n",
            field.name,
            field.kind.json_type(),
            if field.required { ", required" } else { "" },
            field.description
        ));
    }
    out
}
