//! Fail-open helpers for side effects that must never fail a feature
//!
//! Agent-output flushes, audit logging and cancel-time status reverts go
//! through these. Status transitions that decide a feature's outcome do not.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Base delay between retries; attempt `n` waits `n * RETRY_STEP`
const RETRY_STEP: Duration = Duration::from_millis(100);

/// Run `f`, logging and swallowing any error
///
/// ```no_run
/// use foreman_core::fail_open::fail_open;
/// use foreman_core::Result;
///
/// async fn flush() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let flushed = fail_open("agent_output_flush", flush).await;
///     assert!(flushed.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation, error = %e, "fail-open operation failed");
            None
        }
    }
}

/// Run `f` up to `attempts` times with linear backoff before giving up
pub async fn fail_open_with_retries<F, Fut, T>(operation: &str, mut f: F, attempts: usize) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == attempts => {
                warn!(operation, attempts, error = %e, "fail-open operation gave up");
            }
            Err(e) => {
                warn!(operation, attempt, attempts, error = %e, "fail-open operation failed, retrying");
                tokio::time::sleep(RETRY_STEP * attempt as u32).await;
            }
        }
    }
    None
}
