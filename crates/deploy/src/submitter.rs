//! Builds, signs and sends one operation, then interprets its receipt.

use std::sync::{Mutex, PoisonError};

use alloy_core::primitives::{Address, Bytes, TxHash, U256};
use backon::Sleeper;

use crate::{
    error::TxError,
    ledger::{Ledger, PendingTransaction, Receipt},
    orchestrator::RunContext,
    retry,
    stage::{Action, Operation},
    tx::{SignedTransaction, TxRequest},
};

/// Headroom added on top of the node's gas estimate.
pub const GAS_MARGIN_PERCENT: u64 = 20;

fn with_margin(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_MARGIN_PERCENT) / 100)
}

/// Sends operations from the run's account.
pub struct TransactionSubmitter<'a, L, S> {
    ctx: &'a RunContext<L, S>,
}

impl<'a, L: Ledger, S: Sleeper + Clone> TransactionSubmitter<'a, L, S> {
    pub fn new(ctx: &'a RunContext<L, S>) -> Self {
        Self { ctx }
    }

    /// Build and sign the transaction for `nonce`. Gas parameters come from the ledger.
    pub async fn sign(
        &self,
        nonce: u64,
        to: Option<Address>,
        input: &Bytes,
    ) -> Result<SignedTransaction, TxError> {
        let ctx = self.ctx;
        let gas_price = ctx.ledger.gas_price().await?;
        let estimate = ctx
            .ledger
            .estimate_gas(ctx.account.address(), to, input)
            .await?;

        TxRequest {
            chain_id: ctx.chain_id,
            nonce,
            gas_price,
            gas_limit: with_margin(estimate),
            to,
            value: U256::ZERO,
            input: input.clone(),
        }
        .sign(&ctx.account)
        .map_err(TxError::Fatal)
    }

    /// Sign and send. The returned handle resolves to the receipt.
    pub async fn submit(
        &self,
        nonce: u64,
        to: Option<Address>,
        input: &Bytes,
    ) -> Result<PendingTransaction<'a, L, S>, TxError> {
        let tx = self.sign(nonce, to, input).await?;
        self.send(&tx).await
    }

    async fn send(&self, tx: &SignedTransaction) -> Result<PendingTransaction<'a, L, S>, TxError> {
        let ctx = self.ctx;
        let tx_hash = ctx.ledger.send_transaction(tx).await?;
        tracing::info!(nonce = tx.request.nonce, %tx_hash, "Transaction sent");
        Ok(PendingTransaction::new(
            &ctx.ledger,
            tx_hash,
            ctx.confirmation.receipt_poll(),
            ctx.sleeper.clone(),
        ))
    }

    /// A nonzero outcome is an on-chain failure and is never retried.
    pub fn interpret(receipt: Receipt) -> Result<Receipt, TxError> {
        if receipt.succeeded() {
            Ok(receipt)
        } else {
            Err(TxError::Reverted {
                tx_hash: receipt.tx_hash,
                status: receipt.outcome_status,
            })
        }
    }

    /// Run `operation` with `nonce` under the retry policy until its receipt is in.
    ///
    /// A deployed address is recorded in the directory once, after the
    /// successful receipt, and never for a failed operation.
    pub async fn execute(&self, operation: &Operation, nonce: u64) -> Result<Receipt, TxError> {
        let ctx = self.ctx;
        // Every retry re-signs with a fresh gas price, so each attempt has its own hash.
        let signed: Mutex<Vec<TxHash>> = Mutex::new(Vec::new());
        let signed = &signed;

        let receipt = retry::run(&ctx.retry, ctx.sleeper.clone(), &operation.label, move || {
            async move {
                if ctx.retry.verify_before_resubmit {
                    let hashes = signed.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    if let Some(receipt) = self.check_previous(&hashes, nonce).await? {
                        return Self::interpret(receipt);
                    }
                }

                let tx = self
                    .sign(nonce, operation.action.to(), operation.action.input())
                    .await?;
                // Remember the hash before sending: a lost response may still mean it landed.
                signed.lock().unwrap_or_else(PoisonError::into_inner).push(tx.hash);

                let pending = self.send(&tx).await?;
                // Receipt query failures are polled again, not re-sent.
                let receipt = retry::run(&ctx.retry, ctx.sleeper.clone(), "receipt", || {
                    pending.resolve()
                })
                .await?;
                Self::interpret(receipt)
            }
        })
        .await?;

        tracing::info!(
            operation = %operation.label,
            nonce,
            tx_hash = %receipt.tx_hash,
            "Operation confirmed"
        );
        self.record(operation, &receipt)?;
        Ok(receipt)
    }

    /// Look up every earlier attempt for `nonce` before re-sending.
    ///
    /// # Arguments
    /// * `hashes` - Hashes of the transactions signed so far for this operation
    /// * `nonce` - The nonce all of them carry
    ///
    /// # Returns
    /// The receipt of whichever attempt was mined, `None` when the nonce is still
    /// free, or a fatal error when a transaction this run did not sign consumed it.
    async fn check_previous(
        &self,
        hashes: &[TxHash],
        nonce: u64,
    ) -> Result<Option<Receipt>, TxError> {
        if hashes.is_empty() {
            return Ok(None);
        }
        if let Some(receipt) = self.find_receipt(hashes).await? {
            tracing::info!(nonce, tx_hash = %receipt.tx_hash, "Previous attempt was mined, not re-sending");
            return Ok(Some(receipt));
        }

        let observed = self.ctx.ledger.next_nonce(self.ctx.account.address()).await?;
        if observed > nonce {
            // An attempt may have been mined between both queries.
            if let Some(receipt) = self.find_receipt(hashes).await? {
                return Ok(Some(receipt));
            }
            return Err(TxError::fatal(format!(
                "nonce {nonce} was consumed by a transaction other than the {} signed for it",
                hashes.len()
            )));
        }
        Ok(None)
    }

    async fn find_receipt(&self, hashes: &[TxHash]) -> Result<Option<Receipt>, TxError> {
        for tx_hash in hashes {
            if let Some(receipt) = self.ctx.ledger.receipt(*tx_hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    fn record(&self, operation: &Operation, receipt: &Receipt) -> Result<(), TxError> {
        let (Some(key), Action::Deploy { .. }) = (&operation.record, &operation.action) else {
            return Ok(());
        };
        let address = receipt.contract_address.ok_or_else(|| {
            TxError::fatal(format!(
                "receipt {} of `{}` carries no contract address",
                receipt.tx_hash, operation.label
            ))
        })?;
        self.ctx.directory.set(key, address).map_err(TxError::Fatal)
    }
}
