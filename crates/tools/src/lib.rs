//! Built-in data capabilities for DataRouter.
//!
//! The reasoning engine answers questions about a table by choosing among
//! three capabilities: look up rows, analyze them, and chart them. Two of
//! them consult the engine again for structured sub-answers.

pub mod analyze_data;
pub mod generate_chart;
pub mod lookup_data;
pub mod structured;
pub mod table;

use std::sync::Arc;

use datarouter_config::AppConfig;
use datarouter_core::capability::CapabilityRegistry;
use datarouter_core::engine::ReasoningEngine;
use datarouter_core::error::CapabilityError;

pub use analyze_data::AnalyzeData;
pub use generate_chart::{ChartSpec, ChartType, GenerateChart};
pub use lookup_data::LookupData;
pub use structured::{EnginePrompt, extract_json_object};
pub use table::{Cell, ResultSet, TableError, TableQuery, TableStore};

/// Create the registry of built-in capabilities.
///
/// Sub-calls made by the capabilities use `engine` with `model` and the
/// configured default temperature.
pub fn default_registry(
    engine: Arc<dyn ReasoningEngine>,
    model: &str,
    store: Arc<TableStore>,
    config: &AppConfig,
) -> Result<CapabilityRegistry, CapabilityError> {
    let prompt = EnginePrompt::new(engine, model, config.default_temperature);

    let mut registry = CapabilityRegistry::new();
    registry.add(Arc::new(LookupData::new(
        store,
        prompt.clone(),
        config.data.max_rows,
    )))?;
    registry.add(Arc::new(AnalyzeData::new(prompt.clone())))?;
    registry.add(Arc::new(GenerateChart::new(
        prompt,
        config.chart.on_malformed_config,
    )))?;
    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use datarouter_core::engine::{EngineRequest, EngineResponse, ReasoningEngine};
    use datarouter_core::error::EngineError;

    use crate::table::TableStore;

    /// An engine that answers sub-calls with canned text, in order.
    pub struct CannedEngine {
        replies: Mutex<VecDeque<Result<String, EngineError>>>,
        requests: Mutex<Vec<EngineRequest>>,
    }

    impl CannedEngine {
        pub fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(error: EngineError) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from([Err(error)])),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn last_request(&self) -> Option<EngineRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ReasoningEngine for CannedEngine {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::MalformedResponse("script exhausted".into())))
                .map(EngineResponse::answer)
        }
    }

    pub fn sample_store() -> Arc<TableStore> {
        let csv = "store,date,sales\n\
                   1,2021-11-01,120\n\
                   1,2021-11-02,80\n\
                   2,2021-11-01,200\n\
                   2,2021-11-02,150\n";
        Arc::new(TableStore::from_csv_str("sales", csv).unwrap())
    }
}
