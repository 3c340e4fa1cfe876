//! # DataRouter Core
//!
//! Domain types, traits, and error definitions for the DataRouter agent
//! orchestrator. This crate does no I/O — it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates:
//! - [`ReasoningEngine`] — the model that decides what to do next (`datarouter-providers`)
//! - [`Capability`] — a named, schema-typed callable (`datarouter-tools`)
//!
//! The append-only [`Conversation`] log, the immutable [`CapabilityRegistry`]
//! and the stateless [`CapabilityInvoker`] are concrete and shared by all.

pub mod capability;
pub mod engine;
pub mod error;
pub mod event;
pub mod invoker;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use capability::{
    Arguments, Capability, CapabilityRegistry, CapabilityRequest, CapabilityResult,
    CapabilitySpec, FieldKind, FieldSpec, InputSchema,
};
pub use engine::{EngineRequest, EngineResponse, ReasoningEngine, Usage};
pub use error::{CapabilityError, ConversationError, EngineError, Error, Result};
pub use event::{DomainEvent, EventBus, InteractionOutcome};
pub use invoker::CapabilityInvoker;
pub use message::{Conversation, ConversationId, Message, Role};
