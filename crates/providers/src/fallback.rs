//! Ordered engine chain with a deadline per link.
//!
//! Each engine is tried in turn until one answers. The orchestrator sees a
//! single engine and treats whatever error leaves the chain as final, so this
//! is the only place a failed engine call is retried.

use async_trait::async_trait;
use datarouter_core::engine::{EngineRequest, EngineResponse, ReasoningEngine};
use datarouter_core::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

struct Link {
    engine: Arc<dyn ReasoningEngine>,
    deadline: Duration,
}

impl Link {
    async fn attempt(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        match tokio::time::timeout(self.deadline, self.engine.complete(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Timeout(format!(
                "Engine '{}' gave no answer within {}s",
                self.engine.name(),
                self.deadline.as_secs()
            ))),
        }
    }
}

/// Presents several engines as one, moving down the chain on failure.
pub struct FallbackEngine {
    name: String,
    links: Vec<Link>,
}

impl FallbackEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
        }
    }

    /// Append `engine`, giving it `deadline` to answer before moving on.
    pub fn add(mut self, engine: Arc<dyn ReasoningEngine>, deadline: Duration) -> Self {
        self.links.push(Link { engine, deadline });
        self
    }

    /// Append `engine` with a two minute deadline.
    pub fn add_default(self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.add(engine, DEFAULT_DEADLINE)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Names of the chained engines, in the order they are tried.
    pub fn engine_names(&self) -> Vec<&str> {
        self.links.iter().map(|link| link.engine.name()).collect()
    }
}

#[async_trait]
impl ReasoningEngine for FallbackEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let Some((last, rest)) = self.links.split_last() else {
            return Err(EngineError::NotConfigured(format!(
                "fallback chain '{}' has no engines",
                self.name
            )));
        };

        for (position, link) in rest.iter().enumerate() {
            debug!(engine = %link.engine.name(), position, "Trying chained engine");
            match link.attempt(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => warn!(
                    engine = %link.engine.name(),
                    error = %e,
                    "Chained engine failed, moving to the next one"
                ),
            }
        }

        // The last link's error is the one the caller sees
        debug!(engine = %last.engine.name(), position = rest.len(), "Trying last chained engine");
        last.attempt(request).await
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        for link in &self.links {
            if matches!(link.engine.health_check().await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
