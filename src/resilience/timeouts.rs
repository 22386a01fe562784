//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every outbound call (store, topic, downstream service)
//! - Map an elapsed deadline to the caller's own error type
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities so paused-time tests drive deadlines
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use crate::resilience::errors::CallError;

/// Run `fut` under `limit`, producing `on_timeout()` if it elapses.
pub async fn bounded<T, E, F, G>(limit: Duration, fut: F, on_timeout: G) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    G: FnOnce() -> E,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Deadline for a single downstream attempt.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    bounded(limit, fut, || CallError::Timeout(limit)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_maps_to_timeout() {
        let result: Result<(), CallError> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(CallError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, CallError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
