//! Reasoning engine implementations for DataRouter.
//!
//! All engines implement the `datarouter_core::ReasoningEngine` trait.
//! The router builds the configured engine (optionally wrapped in a
//! fallback chain) from `AppConfig`.

pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use fallback::FallbackEngine;
pub use openai_compat::OpenAiCompatEngine;
pub use router::{EngineRouter, build_from_config};
