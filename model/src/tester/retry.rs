use crate::clients::{self, Error as ClientError};
use crate::config::RetryPolicy;
use log::warn;
use std::future::Future;

/// Runs `operation` until it succeeds, fails with an error that is not transient, or the
/// policy's attempts are used up. Returns the last error in the latter two cases.
pub(crate) async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> clients::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay(attempt - 1);
                warn!(
                    "{} failed (attempt {} of {}), retrying in {}ms: {}",
                    operation_name,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_backoff() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();
        let result = retry_transient(&policy(), "delete", || async move {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(ClientError::transient("delete", "Bucket/b", "throttled")),
                _ => Ok(()),
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: clients::Result<()> = retry_transient(&policy(), "delete", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::transient("delete", "Bucket/b", "throttled"))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: clients::Result<()> = retry_transient(&policy(), "delete", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::other("delete", "Bucket/b", "forbidden"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
