//! Chart generation capability — turns a data table and a visualization goal
//! into a Vega-Lite v5 specification.
//!
//! The engine picks the chart configuration; the data values come straight
//! from the table text so the engine never re-types numbers.

use async_trait::async_trait;
use datarouter_config::MalformedOutputPolicy;
use datarouter_core::capability::{Arguments, Capability, CapabilitySpec, FieldKind, InputSchema};
use datarouter_core::error::CapabilityError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::structured::{EnginePrompt, extract_json_object};
use crate::table::{Cell, ResultSet};

pub const NAME: &str = "generate_chart";

pub const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";

const CHART_CONFIG_PROMPT: &str = "You choose chart configurations. Respond with a single JSON \
object and nothing else, with the fields \"chart_type\" (one of \"line\", \"bar\", \"scatter\", \
\"area\"), \"x_axis\" (a column name), \"y_axis\" (a column name) and \"title\".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Scatter,
    Area,
}

impl ChartType {
    fn mark(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Scatter => "point",
            Self::Area => "area",
        }
    }
}

/// The chart configuration the engine is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x_axis: String,
    pub y_axis: String,
    pub title: String,
}

impl ChartSpec {
    /// The configuration substituted under [`MalformedOutputPolicy::Fallback`]:
    /// a line chart of the first two columns.
    pub fn fallback(goal: &str, columns: &[String]) -> Option<Self> {
        match columns {
            [x, y, ..] => Some(Self {
                chart_type: ChartType::Line,
                x_axis: x.clone(),
                y_axis: y.clone(),
                title: goal.to_string(),
            }),
            _ => None,
        }
    }

    fn check_columns(&self, columns: &[String]) -> Result<(), String> {
        for axis in [&self.x_axis, &self.y_axis] {
            if !columns.contains(axis) {
                return Err(format!(
                    "column '{axis}' is not in the data (columns: {})",
                    columns.join(", ")
                ));
            }
        }
        Ok(())
    }
}

pub struct GenerateChart {
    prompt: EnginePrompt,
    policy: MalformedOutputPolicy,
}

impl GenerateChart {
    pub fn new(prompt: EnginePrompt, policy: MalformedOutputPolicy) -> Self {
        Self { prompt, policy }
    }

    async fn chart_spec(
        &self,
        data: &ResultSet,
        goal: &str,
    ) -> Result<Result<ChartSpec, String>, CapabilityError> {
        let request = format!(
            "Columns: {}\n\nVisualization goal: {goal}",
            data.columns.join(", ")
        );
        let text = self.prompt.ask(NAME, CHART_CONFIG_PROMPT, request).await?;
        Ok(parse_chart_spec(&text, &data.columns))
    }
}

/// Parse the engine's chart configuration, checking its axes against `columns`.
fn parse_chart_spec(text: &str, columns: &[String]) -> Result<ChartSpec, String> {
    let value = extract_json_object(text)
        .ok_or_else(|| format!("chart configuration is not a JSON object: {text}"))?;
    let spec: ChartSpec = serde_json::from_value(value)
        .map_err(|e| format!("chart configuration is invalid: {e}"))?;
    spec.check_columns(columns)?;
    Ok(spec)
}

#[async_trait]
impl Capability for GenerateChart {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::new(
            NAME,
            "Generate a Vega-Lite chart specification from a data table (as returned by \
             lookup_data) and a visualization goal.",
            InputSchema::new()
                .required("data", FieldKind::String, "The data table to chart")
                .required(
                    "visualization_goal",
                    FieldKind::String,
                    "What the chart should show",
                ),
        )
    }

    async fn execute(&self, arguments: Arguments) -> Result<String, CapabilityError> {
        let raw = arguments.str("data").unwrap_or_default();
        let goal = arguments.str("visualization_goal").unwrap_or_default();

        let data = ResultSet::parse_rendered(raw).ok_or_else(|| {
            CapabilityError::execution(
                NAME,
                "data must be a pipe-delimited table as returned by lookup_data",
            )
        })?;

        let (spec, note) = match self.chart_spec(&data, goal).await? {
            Ok(spec) => (spec, None),
            Err(reason) => match self.policy {
                MalformedOutputPolicy::Fail => {
                    return Err(CapabilityError::InvalidArguments {
                        capability: NAME.into(),
                        reason,
                    });
                }
                MalformedOutputPolicy::Fallback => {
                    let spec = ChartSpec::fallback(goal, &data.columns).ok_or_else(|| {
                        CapabilityError::execution(
                            NAME,
                            format!("{reason}; fallback needs at least two columns"),
                        )
                    })?;
                    warn!(%reason, "Malformed chart configuration, using fallback");
                    let note = format!(
                        "Fallback applied: the chart configuration was malformed ({reason}); \
                         showing a line chart of '{}' against '{}'.",
                        spec.y_axis, spec.x_axis
                    );
                    (spec, Some(note))
                }
            },
        };

        let chart = render_vega_lite(&spec, &data);
        let chart = serde_json::to_string_pretty(&chart)
            .map_err(|e| CapabilityError::execution(NAME, e.to_string()))?;

        Ok(match note {
            Some(note) => format!("{note}\n{chart}"),
            None => chart,
        })
    }
}

/// Render a Vega-Lite v5 specification with the data inlined.
pub fn render_vega_lite(spec: &ChartSpec, data: &ResultSet) -> Value {
    json!({
        "$schema": VEGA_LITE_SCHEMA,
        "title": spec.title,
        "data": { "values": data.to_records() },
        "mark": { "type": spec.chart_type.mark(), "tooltip": true },
        "encoding": {
            "x": { "field": spec.x_axis, "type": field_type(data, &spec.x_axis) },
            "y": { "field": spec.y_axis, "type": field_type(data, &spec.y_axis) },
        },
    })
}

/// Vega-Lite measurement type of a column, inferred from its values.
fn field_type(data: &ResultSet, column: &str) -> &'static str {
    let Some(idx) = data.columns.iter().position(|c| c == column) else {
        return "nominal";
    };
    let values: Vec<&Cell> = data
        .rows
        .iter()
        .map(|r| &r[idx])
        .filter(|c| **c != Cell::Null)
        .collect();

    if values.is_empty() {
        "nominal"
    } else if values.iter().all(|c| matches!(c, Cell::Number(_))) {
        "quantitative"
    } else if values.iter().all(|c| matches!(c, Cell::Text(t) if looks_like_date(t))) {
        "temporal"
    } else {
        "nominal"
    }
}

/// `YYYY-MM-DD`, optionally followed by a time.
fn looks_like_date(text: &str) -> bool {
    let b = text.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}
