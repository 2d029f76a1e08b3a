//! Bounded retry of optimistic-concurrency conflicts.
//!
//! Repositories never retry on their own. A caller that wants to absorb
//! conflicts re-runs the whole load/decide/save closure here, so every
//! attempt decides against freshly loaded state.

use std::future::Future;

use rampart_core::error::DomainError;
use tracing::debug;

/// Runs `op` up to `max_attempts` times, retrying only on
/// `DomainError::ConcurrencyConflict`. The closure receives the 1-based
/// attempt number. A `max_attempts` of 0 is treated as 1.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last conflict once the
/// attempts are exhausted.
pub async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, DomainError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                debug!(attempt, max_attempts, error = %e, "retrying after conflict");
                attempt += 1;
            }
            other => return other,
        }
    }
}
