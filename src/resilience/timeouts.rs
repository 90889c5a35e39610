//! Timeout enforcement for outbound hops.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - A timeout is reported as its own failure kind, distinct from transport
//!   errors, so callers can map it to 504 instead of 502

use std::future::Future;
use std::time::Duration;

use crate::chain::HopFailure;

/// Run `fut` with a deadline, turning expiry into [`HopFailure::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, HopFailure>
where
    F: Future<Output = Result<T, HopFailure>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(HopFailure::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expiry_is_classified() {
        let result: Result<(), HopFailure> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(HopFailure::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_deadline(Duration::from_secs(1), async { Ok::<_, HopFailure>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u8, HopFailure> = with_deadline(Duration::from_secs(1), async {
            Err(HopFailure::Status(503))
        })
        .await;
        assert_eq!(err, Err(HopFailure::Status(503)));
    }
}
