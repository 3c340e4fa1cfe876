//! Capability trait and registry — the abstraction over what the engine may ask for.
//!
//! A capability is a named, schema-typed callable: a data lookup, an analysis
//! step, a chart generator. Each one declares a [`CapabilitySpec`] whose
//! [`InputSchema`] is validated before the implementation ever runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CapabilityError;
use crate::message::Message;

/// A request, emitted by the reasoning engine, to invoke one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Unique call ID (matches the engine's tool call id)
    pub id: String,

    /// Name of the capability to invoke
    pub name: String,

    /// Raw argument payload, as serialized JSON text
    pub arguments: String,
}

/// The outcome of one capability call. Always representable as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum CapabilityResult {
    Success(String),
    Failure(String),
}

impl CapabilityResult {
    /// Build the failure payload for a capability error.
    pub fn from_error(err: &CapabilityError) -> Self {
        Self::Failure(format!("{}: {}", err.kind(), err))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Success(text) | Self::Failure(text) => text,
        }
    }

    /// Convert into the capability-result message answering `call_id`.
    pub fn into_message(self, call_id: impl Into<String>) -> Message {
        match self {
            Self::Success(text) => Message::capability_result(call_id, text),
            Self::Failure(text) => Message::capability_failure(call_id, text),
        }
    }
}

/// The type of a single argument field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    /// The JSON Schema `type` keyword for this kind.
    pub fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.as_f64().is_some_and(|n| n.fract() == 0.0),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One named argument of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
}

/// The declared input schema of a capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn required(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: &str, kind: FieldKind, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Parse a raw argument payload against this schema.
    ///
    /// An empty payload is read as `{}`. Nulls count as absent. Unknown
    /// fields are rejected.
    pub fn parse(&self, raw: &str) -> Result<Arguments, String> {
        let raw = raw.trim();
        let value: Value = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))?
        };
        self.validate(value)
    }

    /// Validate an already-decoded argument value against this schema.
    pub fn validate(&self, value: Value) -> Result<Arguments, String> {
        let Value::Object(mut map) = value else {
            return Err("arguments must be a JSON object".into());
        };

        map.retain(|_, v| !v.is_null());

        if let Some(unknown) = map.keys().find(|k| self.field(k).is_none()) {
            return Err(format!("unknown field '{unknown}'"));
        }

        for field in &self.fields {
            match map.get(&field.name) {
                None if field.required => {
                    return Err(format!("missing required field '{}'", field.name));
                }
                None => {}
                Some(v) if !field.kind.matches(v) => {
                    return Err(format!(
                        "field '{}' must be of type {}",
                        field.name,
                        field.kind.json_type()
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(Arguments(map))
    }

    /// Render this schema as a JSON Schema object for the engine boundary.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    serde_json::json!({
                        "type": f.kind.json_type(),
                        "description": f.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.0
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|n| n as i64)))
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Declaration of a capability: its unique name, what it does, and its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub input: InputSchema,
}

impl CapabilitySpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input: InputSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input,
        }
    }
}

/// The uniform interface every capability implementation provides.
///
/// Implementations receive arguments that already passed the declared
/// schema. They must not touch the conversation: only the orchestrator
/// appends to it.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The declaration this implementation is registered under.
    fn spec(&self) -> CapabilitySpec;

    /// Execute with validated arguments, producing a textual result.
    async fn execute(&self, arguments: Arguments) -> Result<String, CapabilityError>;
}

struct Registered {
    spec: CapabilitySpec,
    implementation: Arc<dyn Capability>,
}

/// The fixed vocabulary of capabilities the engine may request.
///
/// Built once before any interaction starts and then shared read-only
/// (typically behind an `Arc`).
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Registered>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under `spec.name`.
    pub fn register(
        &mut self,
        spec: CapabilitySpec,
        implementation: Arc<dyn Capability>,
    ) -> Result<(), CapabilityError> {
        if self.entries.contains_key(&spec.name) {
            return Err(CapabilityError::DuplicateCapability(spec.name));
        }
        let name = spec.name.clone();
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Registered {
                spec,
                implementation,
            },
        );
        Ok(())
    }

    /// Register an implementation under its own declared spec.
    pub fn add(&mut self, implementation: Arc<dyn Capability>) -> Result<(), CapabilityError> {
        self.register(implementation.spec(), implementation)
    }

    /// Look up a capability's declaration and implementation.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(&CapabilitySpec, Arc<dyn Capability>), CapabilityError> {
        self.entries
            .get(name)
            .map(|r| (&r.spec, Arc::clone(&r.implementation)))
            .ok_or_else(|| CapabilityError::UnknownCapability(name.to_string()))
    }

    /// All declarations, in registration order.
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|r| r.spec.clone())
            .collect()
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
