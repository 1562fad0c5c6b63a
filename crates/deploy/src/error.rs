//! Error taxonomy for deployment runs.
//!
//! Two layers are distinguished:
//! - [`TxError`] classifies the failure of a single ledger interaction, and is what the
//!   retry wrapper inspects to decide between retrying and bailing out.
//! - [`DeployError`] describes why a whole run aborted (bad configuration, a missing
//!   prerequisite address, or a failed stage).
//!
//! Everything else flows through `anyhow` with context attached.

use alloy_core::primitives::{Address, TxHash, U256};

/// Failure of a single ledger interaction (read-call, send, receipt or nonce query).
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// The transaction was mined but its execution failed on-chain.
    #[error("transaction {tx_hash} failed on-chain with outcome status {status}")]
    Reverted { tx_hash: TxHash, status: u64 },

    /// A failure the caller decided must not be retried.
    #[error(transparent)]
    Fatal(anyhow::Error),

    /// A transport or node-side failure. Eligible for retry.
    #[error("ledger rpc failure: {0:#}")]
    Rpc(anyhow::Error),
}

impl TxError {
    /// Whether this failure is terminal for the operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Reverted { .. } | Self::Fatal(_))
    }

    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        Self::Fatal(anyhow::anyhow!("{msg}"))
    }
}

/// Reasons a deployment run aborts.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("account {address} balance {balance} wei is below the required {required} wei")]
    InsufficientBalance {
        address: Address,
        balance: U256,
        required: U256,
    },

    #[error(
        "no {contract} address known for asset `{asset}`; deploy it first or pass an explicit override"
    )]
    UnresolvedDependency {
        asset: String,
        contract: &'static str,
    },

    #[error("could not read the starting nonce for {address}")]
    NonceInit {
        address: Address,
        #[source]
        source: TxError,
    },

    #[error("stage `{stage}` aborted: `{operation}` (nonce {nonce}) failed")]
    Stage {
        stage: String,
        operation: String,
        nonce: u64,
        #[source]
        source: TxError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let reverted = TxError::Reverted {
            tx_hash: TxHash::ZERO,
            status: 1,
        };
        assert!(reverted.is_fatal());
        assert!(TxError::fatal("nope").is_fatal());
        assert!(!TxError::Rpc(anyhow::anyhow!("connection reset")).is_fatal());
    }

    #[test]
    fn test_stage_error_names_stage_and_operation() {
        let err = DeployError::Stage {
            stage: "ledgers".to_string(),
            operation: "deploy ledger EOS".to_string(),
            nonce: 12,
            source: TxError::Rpc(anyhow::anyhow!("timeout")),
        };
        let msg = err.to_string();
        assert!(msg.contains("ledgers"));
        assert!(msg.contains("deploy ledger EOS"));
        assert!(msg.contains("nonce 12"));
    }
}
