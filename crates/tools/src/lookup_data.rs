//! Data lookup capability — answers questions by querying the table store.
//!
//! The engine may pass a structured query directly; otherwise the natural
//! language prompt is translated into a [`TableQuery`] by a sub-call.

use std::sync::Arc;

use async_trait::async_trait;
use datarouter_core::capability::{Arguments, Capability, CapabilitySpec, FieldKind, InputSchema};
use datarouter_core::error::CapabilityError;
use tracing::debug;

use crate::structured::{EnginePrompt, extract_json_object};
use crate::table::{TableQuery, TableStore};

pub const NAME: &str = "lookup_data";

const QUERY_GENERATION_PROMPT: &str = "You translate questions about a table into a JSON query. \
Respond with a single JSON object and nothing else. Fields (all optional): \
\"columns\": [names], \
\"filters\": [{\"column\": name, \"op\": \"eq|ne|gt|gte|lt|lte|contains\", \"value\": v}], \
\"group_by\": name, \
\"aggregate\": {\"op\": \"sum|avg|count|min|max\", \"column\": name or \"*\"}, \
\"order_by\": {\"column\": result column, \"descending\": bool}, \
\"limit\": n. \
Aggregated result columns are named like \"sum(sales)\". Use only the listed columns.";

pub struct LookupData {
    store: Arc<TableStore>,
    prompt: EnginePrompt,
    max_rows: usize,
}

impl LookupData {
    pub fn new(store: Arc<TableStore>, prompt: EnginePrompt, max_rows: usize) -> Self {
        Self {
            store,
            prompt,
            max_rows,
        }
    }

    async fn generate_query(&self, question: &str) -> Result<TableQuery, CapabilityError> {
        let request = format!("{}\n\nQuestion: {question}", self.store.describe());
        let text = self.prompt.ask(NAME, QUERY_GENERATION_PROMPT, request).await?;

        let value = extract_json_object(&text).ok_or_else(|| {
            CapabilityError::execution(
                NAME,
                format!("generated query is not a JSON object: {text}"),
            )
        })?;
        serde_json::from_value(value).map_err(|e| {
            CapabilityError::execution(NAME, format!("generated query is invalid: {e}"))
        })
    }
}

#[async_trait]
impl Capability for LookupData {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            NAME,
            format!(
                "Look up rows from the '{}' table. Returns a pipe-delimited text table. \
                 Columns: {}.",
                self.store.name(),
                self.store.columns().join(", ")
            ),
            InputSchema::new()
                .required("prompt", FieldKind::String, "The question the data should answer")
                .optional(
                    "query",
                    FieldKind::Object,
                    "Optional structured query (columns, filters, group_by, aggregate, order_by, limit)",
                ),
        )
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, CapabilityError> {
        if self.store.columns().is_empty() {
            return Err(CapabilityError::execution(NAME, "no data is loaded"));
        }

        let query = match arguments.value("query") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| CapabilityError::execution(NAME, format!("invalid query: {e}")))?,
            None => {
                let question = arguments.str("prompt").unwrap_or_default();
                self.generate_query(question).await?
            }
        };

        debug!(?query, "Executing table query");
        let result = self
            .store
            .query(&query)
            .map_err(|e| CapabilityError::execution(NAME, e.to_string()))?;

        let query_json = serde_json::to_string(&query).unwrap_or_default();
        Ok(format!("Query: {query_json}\n\n{}", result.render(self.max_rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CannedEngine, sample_store};
    use serde_json::json;

    fn lookup(engine: Arc<CannedEngine>) -> LookupData {
        LookupData::new(sample_store(), EnginePrompt::new(engine, "test-model", 0.0), 10)
    }

    fn args(value: serde_json::Value) -> Arguments {
        lookup(CannedEngine::new(vec![]))
            .spec()
            .input
            .validate(value)
            .unwrap()
    }

    #[test]
    fn spec_lists_columns() {
        let spec = lookup(CannedEngine::new(vec![])).spec();
        assert_eq!(spec.name, "lookup_data");
        assert!(spec.description.contains("store, date, sales"));
        assert!(spec.input.field("prompt").unwrap().required);
        assert!(!spec.input.field("query").unwrap().required);
    }

    #[tokio::test]
    async fn explicit_query_skips_the_engine() {
        let engine = CannedEngine::new(vec![]);
        let output = lookup(engine.clone())
            .execute(args(json!({
                "prompt": "sales at store 2",
                "query": {"columns": ["date", "sales"], "filters": [{"column": "store", "op": "eq", "value": 2}]}
            })))
            .await
            .unwrap();

        assert!(output.contains("date | sales\n--- | ---\n2021-11-01 | 200"));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn prompt_is_translated_by_the_engine() {
        let engine = CannedEngine::new(vec![
            "```json\n{\"group_by\": \"store\", \"aggregate\": {\"op\": \"sum\", \"column\": \"sales\"}}\n```",
        ]);
        let output = lookup(engine.clone())
            .execute(args(json!({"prompt": "total sales per store"})))
            .await
            .unwrap();

        assert!(output.contains("store | sum(sales)"));
        assert!(output.contains("1 | 200"));
        assert_eq!(engine.calls(), 1);

        let request = engine.last_request().unwrap();
        assert!(request.capabilities.is_empty());
        assert!(request.messages[1].content.contains("Question: total sales per store"));
        assert!(request.messages[1].content.contains("Table `sales`"));
    }

    #[tokio::test]
    async fn unparsable_generated_query_fails() {
        let engine = CannedEngine::new(vec!["SELECT * FROM sales"]);
        let err = lookup(engine)
            .execute(args(json!({"prompt": "everything"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CapabilityExecutionFailure");
    }

    #[tokio::test]
    async fn unknown_column_fails() {
        let err = lookup(CannedEngine::new(vec![]))
            .execute(args(json!({"prompt": "x", "query": {"columns": ["revenue"]}})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown column 'revenue'"));
    }

    #[tokio::test]
    async fn empty_store_fails() {
        let lookup = LookupData::new(
            Arc::new(TableStore::empty("sales")),
            EnginePrompt::new(CannedEngine::new(vec![]), "m", 0.0),
            10,
        );
        let err = lookup
            .execute(Arguments::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no data is loaded"));
    }
}
