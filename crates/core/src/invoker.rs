//! Capability invoker — resolve, validate, execute.
//!
//! The invoker is stateless apart from its read-only registry. Failures that
//! happen *inside* a capability (returned errors and panics alike) become
//! [`CapabilityResult::Failure`] payloads so the engine can see them and
//! adapt; only resolution and validation problems are reported as errors.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::capability::{CapabilityRegistry, CapabilityRequest, CapabilityResult};
use crate::error::CapabilityError;

/// Dispatches capability calls through a shared registry.
#[derive(Clone)]
pub struct CapabilityInvoker {
    registry: Arc<CapabilityRegistry>,
}

impl CapabilityInvoker {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Invoke `name` with a raw JSON argument payload.
    ///
    /// Returns `Err` for `UnknownCapability` and `InvalidArguments`; any
    /// failure during execution is returned as `Ok(CapabilityResult::Failure)`.
    pub async fn invoke(
        &self,
        name: &str,
        raw_arguments: &str,
    ) -> Result<CapabilityResult, CapabilityError> {
        let (spec, capability) = self.registry.resolve(name)?;

        let arguments =
            spec.input
                .parse(raw_arguments)
                .map_err(|reason| CapabilityError::InvalidArguments {
                    capability: name.to_string(),
                    reason,
                })?;

        debug!(capability = name, "Executing capability");

        let outcome = AssertUnwindSafe(capability.execute(arguments))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(output)) => CapabilityResult::Success(output),
            Ok(Err(err)) => {
                warn!(capability = name, error = %err, "Capability returned an error");
                CapabilityResult::from_error(&into_execution_failure(name, err))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(capability = name, reason = %reason, "Capability panicked");
                CapabilityResult::from_error(&CapabilityError::execution(name, reason))
            }
        };

        Ok(result)
    }

    /// Invoke a request and always produce a result payload.
    ///
    /// Resolution and validation errors are folded into failure payloads too,
    /// so the caller always has something to append.
    pub async fn dispatch(&self, request: &CapabilityRequest) -> CapabilityResult {
        match self.invoke(&request.name, &request.arguments).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    capability = %request.name,
                    call_id = %request.id,
                    error = %err,
                    "Capability request rejected"
                );
                CapabilityResult::from_error(&err)
            }
        }
    }
}

/// Errors surfaced from inside `execute` are execution failures, whatever
/// variant the implementation picked. Argument complaints keep their kind.
fn into_execution_failure(name: &str, err: CapabilityError) -> CapabilityError {
    match err {
        CapabilityError::ExecutionFailed { .. } | CapabilityError::InvalidArguments { .. } => err,
        other => CapabilityError::execution(name, other.to_string()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
