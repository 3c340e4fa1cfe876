//! Data analysis capability — asks the engine for a concise written analysis.

use async_trait::async_trait;
use datarouter_core::capability::{Arguments, Capability, CapabilitySpec, FieldKind, InputSchema};
use datarouter_core::error::CapabilityError;

use crate::structured::EnginePrompt;

pub const NAME: &str = "analyze_data";

const ANALYSIS_PROMPT: &str = "You are a data analyst. Analyze the data you are given and \
answer in a few sentences. Cite concrete numbers from the data, point out trends or \
outliers, and do not invent values that are not present.";

pub struct AnalyzeData {
    prompt: EnginePrompt,
}

impl AnalyzeData {
    pub fn new(prompt: EnginePrompt) -> Self {
        Self { prompt }
    }
}

#[async_trait]
impl Capability for AnalyzeData {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            NAME,
            "Analyze data (for example the table returned by lookup_data) and return \
             a short written analysis.",
            InputSchema::new()
                .required("data", FieldKind::String, "The data to analyze")
                .required("prompt", FieldKind::String, "What the analysis should focus on"),
        )
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, CapabilityError> {
        let data = arguments.str("data").unwrap_or_default();
        let focus = arguments.str("prompt").unwrap_or_default();
        if data.trim().is_empty() {
            return Err(CapabilityError::execution(NAME, "no data to analyze"));
        }

        let request = format!("Data:\n{data}\n\nAnalyze the data with this goal in mind: {focus}");
        self.prompt.ask(NAME, ANALYSIS_PROMPT, request).await
    }
}
