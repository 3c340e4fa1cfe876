//! The orchestrator loop — the heart of DataRouter.
//!
//! The orchestrator routes each interaction between the reasoning engine
//! and the capability registry:
//!
//! 1. **Start** from the user's query (system prompt ensured)
//! 2. **Ask the engine** with the full conversation and the capability specs
//! 3. **If it requests capabilities**: dispatch them in order, append each
//!    result, and loop back to step 2
//! 4. **If it answers**: return the answer to the caller
//!
//! The loop stops at the answer, at the configured iteration cap, on an
//! engine failure, or when cancelled between engine calls.

pub mod orchestrator;

#[cfg(test)]
mod test_helpers;

pub use orchestrator::{InitialQuery, Orchestrator, OrchestratorError};
pub use tokio_util::sync::CancellationToken;
