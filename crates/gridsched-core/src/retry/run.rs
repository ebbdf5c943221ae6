//! Retry loop: run an async operation until success or policy says stop.

use std::future::Future;

use anyhow::Result;

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the retry policy says to stop.
/// On a transient failure, sleeps for the policy delay then tries again.
/// `what` names the operation in logs.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::warn!(
                            operation = what,
                            attempt,
                            ?kind,
                            error = %e,
                            "transient storage error, retrying in {:?}",
                            d
                        );
                        tokio::time::sleep(d).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_error_is_retried_once() {
        let calls = &AtomicU32::new(0);
        let out = with_retry(&fast_policy(), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::Error::new(sqlx::Error::PoolTimedOut))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let res: Result<()> = with_retry(&fast_policy(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::Error::new(sqlx::Error::PoolTimedOut))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let res: Result<()> = with_retry(&fast_policy(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("constraint violated"))
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
