//! Uniform "run this phase's hook and wait for it" operation.

use super::{Hook, Phase};
use crate::error::ProxyError;
use crate::metrics;
use crate::pipeline::Transaction;
use futures::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, warn};

/// Run the hook registered for `phase`, if any.
///
/// A missing hook completes immediately. A hook that returns an error,
/// panics, or abandons its continuation fails the phase.
pub(crate) async fn invoke(
    phase: Phase,
    hook: Option<&Hook>,
    tx: &mut Transaction,
) -> Result<(), ProxyError> {
    let Some(hook) = hook else {
        return Ok(());
    };

    let started = Instant::now();
    let outcome = match hook {
        Hook::Sync(f) => panic::catch_unwind(AssertUnwindSafe(|| f(tx))),
        Hook::Async(f) => AssertUnwindSafe(f(tx)).catch_unwind().await,
    };
    let elapsed = started.elapsed();

    let result = match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ProxyError::from_hook(phase, err)),
        Err(payload) => Err(ProxyError::hook(
            phase,
            format!("hook panicked: {}", panic_message(payload.as_ref())),
        )),
    };

    match &result {
        Ok(()) => {
            metrics::record_hook(phase, elapsed, "ok");
            debug!(
                %phase,
                kind = if hook.is_async() { "async" } else { "sync" },
                elapsed_ms = elapsed.as_millis() as u64,
                "hook completed"
            );
        }
        Err(err) => {
            metrics::record_hook(phase, elapsed, "error");
            warn!(%phase, error = %err, "hook failed");
        }
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
