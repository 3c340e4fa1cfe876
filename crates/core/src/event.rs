//! Domain event system — observe interactions without coupling to the loop.
//!
//! The orchestrator publishes an event at each step of an interaction.
//! Subscribers (the CLI's step printer, tests) filter for what they need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// How an interaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    Answered,
    NonConvergence,
    EngineError,
    Cancelled,
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user interaction entered the loop
    InteractionStarted {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning engine answered one turn
    EngineResponded {
        conversation_id: String,
        iteration: u32,
        requests: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A capability request was dispatched
    CapabilityInvoked {
        conversation_id: String,
        capability: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The interaction left the loop
    InteractionFinished {
        conversation_id: String,
        engine_calls: u32,
        outcome: InteractionOutcome,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
