//! Supervised task spawning.
//!
//! Every long-running loop in relaynet (socket read/write loops, loopback
//! delivery, the Host accept loop, the update loop) is spawned through
//! [`spawn_supervised`], so a failure or panic inside it always ends up in
//! the log instead of vanishing with the task.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::TransportError;

/// Spawns `fut` on the Tokio runtime and logs how it ended.
///
/// `task` is a static label used in the log line (e.g. `"tcp-read"`).
pub fn spawn_supervised<F>(task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), TransportError>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => tracing::trace!(task, "task finished"),
            Ok(Err(e)) => {
                tracing::debug!(task, error = %e, "task ended with error");
            }
            Err(panic) => {
                tracing::error!(
                    task,
                    panic = panic_message(panic.as_ref()),
                    "task panicked"
                );
            }
        }
    })
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
