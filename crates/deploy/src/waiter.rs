//! Confirmation barrier between dependent stages.

use std::{future::Future, time::Duration};

use alloy_core::primitives::Address;
use backon::Sleeper;
use serde::{Deserialize, Serialize};

use crate::{error::TxError, ledger::Ledger};

/// How often to poll and, optionally, when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the condition holds.
    pub max_polls: Option<usize>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
        }
    }
}

/// Poll `check` until it yields a value, sleeping `policy.interval` between checks.
///
/// # Returns
/// The first value yielded. Errors from `check` are returned as-is and running out
/// of `max_polls` is fatal.
pub async fn poll_until<T, S, F, Fut>(
    policy: PollPolicy,
    sleeper: &S,
    mut check: F,
) -> Result<T, TxError>
where
    S: Sleeper,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, TxError>>,
{
    let mut polls = 0usize;
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        polls += 1;

        if policy.max_polls.is_some_and(|max_polls| polls >= max_polls) {
            return Err(TxError::fatal(format!(
                "condition still unmet after {} polls",
                polls
            )));
        }

        sleeper.sleep(policy.interval).await;
    }
}

/// Settings for [`ConfirmationWaiter`] and receipt polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Interval between next-nonce polls at a stage barrier.
    pub poll_interval_ms: u64,
    /// Interval between receipt polls for a pending transaction.
    pub receipt_poll_interval_ms: u64,
    /// Upper bound on polls. Unset means wait until the operator aborts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<usize>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            receipt_poll_interval_ms: 1_000,
            max_polls: None,
        }
    }
}

impl ConfirmationConfig {
    pub fn nonce_poll(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
        }
    }

    pub fn receipt_poll(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.receipt_poll_interval_ms),
            max_polls: self.max_polls,
        }
    }
}

/// Blocks until the ledger's next-nonce for an account reaches a target.
#[derive(Debug, Clone)]
pub struct ConfirmationWaiter<S> {
    policy: PollPolicy,
    sleeper: S,
}

impl<S: Sleeper> ConfirmationWaiter<S> {
    pub fn new(policy: PollPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Wait until `next_nonce(account) >= target` and return the observed value.
    pub async fn wait_for<L: Ledger>(
        &self,
        ledger: &L,
        account: Address,
        target: u64,
    ) -> Result<u64, TxError> {
        poll_until(self.policy, &self.sleeper, || async move {
            let observed = ledger.next_nonce(account).await?;
            if observed >= target {
                Ok(Some(observed))
            } else {
                tracing::debug!(%account, observed, target, "Waiting for nonce");
                Ok(None)
            }
        })
        .await
    }
}
