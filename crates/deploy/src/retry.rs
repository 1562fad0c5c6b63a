//! Bounded retry with fatal/transient classification.
//!
//! Retrying a send re-submits it. Unless [`RetryPolicy::verify_before_resubmit`] is
//! enabled, nothing checks whether an earlier attempt already landed, so a lost
//! response can lead to a second submission for the same operation.

use std::{future::Future, time::Duration};

use backon::{ConstantBuilder, Retryable, Sleeper};
use serde::{Deserialize, Serialize};

use crate::error::TxError;

/// Fixed-interval retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: usize,
    /// Pause between attempts, in milliseconds. There is no backoff growth.
    pub interval_ms: u64,
    /// Before re-sending a transaction, check whether the previous attempt was mined.
    pub verify_before_resubmit: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_ms: 1_000,
            verify_before_resubmit: false,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Run `operation` until it succeeds, fails fatally, or runs out of attempts.
///
/// # Arguments
/// * `policy` - Attempt count and fixed interval
/// * `sleeper` - Clock used between attempts
/// * `what` - Name of the operation in retry logs
/// * `operation` - Produces a fresh future for every attempt
///
/// # Returns
/// The first success, the first fatal error, or the last error on exhaustion.
pub async fn run<T, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: S,
    what: &str,
    operation: F,
) -> Result<T, TxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TxError>>,
    S: Sleeper,
{
    let backoff = ConstantBuilder::default()
        .with_delay(policy.interval())
        .with_max_times(policy.attempts.saturating_sub(1));

    let mut retries = 0usize;
    operation
        .retry(backoff)
        .sleep(sleeper)
        .when(|err: &TxError| !err.is_fatal())
        .notify(|err: &TxError, after: Duration| {
            retries += 1;
            tracing::warn!(
                operation = %what,
                retry = retries,
                error = %err,
                retry_in = ?after,
                "Transient failure, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting_sleeper(count: Arc<AtomicUsize>) -> impl Sleeper + Clone {
        move |_: Duration| {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 5,
            interval_ms: 10,
            verify_before_resubmit: false,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let sleeps = Arc::new(AtomicUsize::new(0));
        let calls = AtomicUsize::new(0);

        let value = run(&policy(), counting_sleeper(sleeps.clone()), "flaky", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 3 {
                    Err(TxError::Rpc(anyhow::anyhow!("connection reset")))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(sleeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let sleeps = Arc::new(AtomicUsize::new(0));
        let calls = AtomicUsize::new(0);

        let err = run(&policy(), counting_sleeper(sleeps.clone()), "reverting", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(TxError::Reverted {
                    tx_hash: Default::default(),
                    status: 1,
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TxError::Reverted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sleeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let sleeps = Arc::new(AtomicUsize::new(0));
        let calls = AtomicUsize::new(0);

        let err = run(&policy(), counting_sleeper(sleeps.clone()), "down", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(TxError::Rpc(anyhow::anyhow!("attempt {}", call))) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeps.load(Ordering::SeqCst), 4);
        assert!(err.to_string().contains("attempt 4"));
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            attempts: 1,
            ..policy()
        };

        let result = run(&policy, counting_sleeper(Arc::default()), "once", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TxError::Rpc(anyhow::anyhow!("down"))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
