//! Shared wiring: engine, table store and capability registry from config.

use std::path::Path;
use std::sync::Arc;

use datarouter_config::AppConfig;
use datarouter_core::capability::CapabilityRegistry;
use datarouter_core::engine::ReasoningEngine;
use datarouter_providers::build_from_config;
use datarouter_tools::{TableError, TableStore, default_registry};
use tracing::{info, warn};

pub struct Runtime {
    pub engine: Arc<dyn ReasoningEngine>,
    pub registry: Arc<CapabilityRegistry>,
}

impl Runtime {
    pub fn build(
        config: &AppConfig,
        data: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let router = build_from_config(config);
        let engine = router.default().ok_or("No default engine configured")?;
        info!(engine = %engine.name(), model = %config.default_model, "Using reasoning engine");

        let store = Arc::new(load_store(config, data)?);
        let registry = default_registry(engine.clone(), &config.default_model, store, config)?;

        Ok(Self {
            engine,
            registry: Arc::new(registry),
        })
    }
}

/// Load the table from `data`, falling back to the configured path.
pub fn load_store(config: &AppConfig, data: Option<&Path>) -> Result<TableStore, TableError> {
    let table_name = config.data.table_name.as_str();
    match data.or(config.data.path.as_deref()) {
        Some(path) => {
            let store = TableStore::load(path, table_name)?;
            info!(
                path = %path.display(),
                rows = store.len(),
                columns = store.columns().len(),
                "Loaded table"
            );
            Ok(store)
        }
        None => {
            warn!("No data file configured; set [data].path or pass --data");
            Ok(TableStore::empty(table_name))
        }
    }
}
