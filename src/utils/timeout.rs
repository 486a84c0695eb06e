use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::error;

use crate::errors::{EngineError, Result};

/// Runs `future` under `duration`, converting an elapsed timeout into
/// [`EngineError::Timeout`] rather than letting callers deal with
/// `tokio::time::error::Elapsed` directly. Every exchange connector call
/// should be wrapped with this.
pub async fn with_timeout<F, T>(future: F, duration: Duration, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation = operation_name, seconds = duration.as_secs(), "operation timed out");
            Err(EngineError::timeout(operation_name, duration.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_a_fast_result() {
        let result = with_timeout(async { Ok::<_, EngineError>("ok") }, Duration::from_secs(1), "fast").await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn converts_elapsed_to_timeout_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, EngineError>(())
        };
        let result = with_timeout(slow, Duration::from_millis(10), "slow").await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
    }
}
