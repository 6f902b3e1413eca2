//! Cancellable, deadline-bounded polling
//!
//! Every wait in a VIP run goes through [`wait_with_timeout`]: a fixed tick,
//! its own deadline, and a [`CancellationToken`] checked on every tick. A
//! cancelled token ends the wait with a timeout-class error, so callers
//! never hang on a dead run. One-shot calls go through [`with_cancel`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Result type for polling check functions.
///
/// - `Ok(Some(value))` - Condition met, return the value
/// - `Ok(None)` - Condition not met yet, keep polling
/// - `Err(e)` - Fatal error, stop polling immediately
pub type PollResult<T> = Result<Option<T>>;

/// Poll `check_fn` every `interval` until it yields a value.
///
/// Returns `Error::Timeout` naming `stage` when `timeout` elapses, or
/// `Error::Cancelled` as soon as `cancel` fires. A check that is still in flight when the
/// deadline passes is abandoned. Errors from `check_fn` are returned as-is.
pub async fn wait_with_timeout<T, F, Fut>(
    stage: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<T>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            debug!(stage, "wait cancelled");
            return Err(Error::cancelled(stage));
        }

        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(stage)),
            checked = tokio::time::timeout_at(deadline, check_fn()) => checked,
        };

        match checked {
            Err(_) => return Err(Error::timeout(stage, timeout)),
            Ok(result) => {
                if let Some(value) = result? {
                    return Ok(value);
                }
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(stage, timeout));
        }
        debug!("Waiting for {}...", stage);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(stage)),
            _ = tokio::time::sleep(interval.min(deadline - now)) => {}
        }
    }
}

/// Run `fut` unless `cancel` fires first.
///
/// A token that is already cancelled returns `Error::Cancelled` naming
/// `stage` without polling `fut`; one that fires later drops `fut` at its
/// current await point.
pub async fn with_cancel<T, Fut>(stage: &str, cancel: &CancellationToken, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(stage, "cancelled");
            Err(Error::cancelled(stage))
        }
        result = fut => result,
    }
}
