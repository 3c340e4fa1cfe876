//! Error types for the DataRouter domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.

use thiserror::Error;

/// The top-level error type for all DataRouter operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Conversation log errors ---
    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the reasoning engine.
///
/// These are never absorbed into the conversation: the orchestrator surfaces
/// them to its caller as an unrecoverable engine error.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by engine, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures caused by a single capability call.
///
/// The invoker converts every one of these except `DuplicateCapability` into
/// a failure payload that is fed back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("Capability execution failed: {capability}: {reason}")]
    ExecutionFailed { capability: String, reason: String },
}

impl CapabilityError {
    /// Shorthand for an execution failure inside a capability.
    pub fn execution(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            capability: capability.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind, used as the prefix of failure payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateCapability(_) => "DuplicateCapability",
            Self::UnknownCapability(_) => "UnknownCapability",
            Self::InvalidArguments { .. } => "InvalidArguments",
            Self::ExecutionFailed { .. } => "CapabilityExecutionFailure",
        }
    }
}

/// Violations of the append-only conversation log invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Capability result references unknown call id: {call_id}")]
    OrphanResult { call_id: String },

    #[error("Capability call {call_id} already has a result")]
    DuplicateResult { call_id: String },

    #[error("Capability call id {call_id} was already used in this conversation")]
    DuplicateRequestId { call_id: String },

    #[error("Capability request has an empty call id")]
    EmptyRequestId,
}
