//! Operations and the stages that group them.

use alloy_core::primitives::{Address, Bytes};

use crate::{contracts::ContractKind, ledger::Receipt};

/// What an operation does on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create a contract from `init_code` (bytecode followed by constructor arguments).
    Deploy {
        contract: ContractKind,
        init_code: Bytes,
    },
    /// State-mutating call on an existing contract.
    Call { target: Address, input: Bytes },
}

impl Action {
    /// Transaction recipient, `None` for a contract creation.
    pub fn to(&self) -> Option<Address> {
        match self {
            Self::Deploy { .. } => None,
            Self::Call { target, .. } => Some(*target),
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            Self::Deploy { init_code, .. } => init_code,
            Self::Call { input, .. } => input,
        }
    }
}

/// A unit of work inside a stage. Gets its nonce when the stage is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub label: String,
    pub action: Action,
    /// Directory key under which a deployed address is recorded once confirmed.
    pub record: Option<String>,
}

impl Operation {
    pub fn deploy(label: impl Into<String>, contract: ContractKind, init_code: Bytes) -> Self {
        Self {
            label: label.into(),
            action: Action::Deploy {
                contract,
                init_code,
            },
            record: None,
        }
    }

    pub fn call(label: impl Into<String>, target: Address, input: Bytes) -> Self {
        Self {
            label: label.into(),
            action: Action::Call { target, input },
            record: None,
        }
    }

    /// Record the deployed address under `key` after the receipt confirms success.
    pub fn recorded_as(mut self, key: impl Into<String>) -> Self {
        self.record = Some(key.into());
        self
    }
}

/// Independent operations dispatched together and confirmed by one barrier.
///
/// An operation must never depend on the effect of another operation of the
/// same stage: their relative execution order is not part of the contract.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    pub name: String,
    pub operations: Vec<Operation>,
    /// Upper bound on operations awaiting their receipt at once. `None` dispatches all.
    pub max_in_flight: Option<usize>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A confirmed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub label: String,
    pub nonce: u64,
    pub receipt: Receipt,
}

/// Result of a stage that passed its confirmation barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub stage: String,
    /// Nonces `first_nonce..target` were used by this stage.
    pub first_nonce: u64,
    pub target: u64,
    /// Next nonce reported by the ledger once the barrier passed.
    pub observed_nonce: u64,
    /// Ordered by nonce.
    pub outcomes: Vec<OperationOutcome>,
}

impl StageReport {
    pub fn outcome(&self, label: &str) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| o.label == label)
    }

    /// Address created by the deployment labelled `label`.
    pub fn deployed(&self, label: &str) -> Option<Address> {
        self.outcome(label)
            .and_then(|o| o.receipt.contract_address)
    }

    pub fn nonces(&self) -> Vec<u64> {
        self.outcomes.iter().map(|o| o.nonce).collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::TxHash;

    use super::*;

    #[test]
    fn test_action_recipient_and_input() {
        let deploy = Operation::deploy(
            "deploy token EOS",
            ContractKind::MintableToken,
            Bytes::from_static(&[0x60]),
        )
        .recorded_as("EOS.token");
        assert_eq!(deploy.action.to(), None);
        assert_eq!(deploy.action.input().as_ref(), &[0x60]);
        assert_eq!(deploy.record.as_deref(), Some("EOS.token"));

        let target = Address::repeat_byte(1);
        let call = Operation::call("pause ledger EOS", target, Bytes::from_static(&[1, 2]));
        assert_eq!(call.action.to(), Some(target));
        assert!(call.record.is_none());
    }

    #[test]
    fn test_report_lookup() {
        let address = Address::repeat_byte(4);
        let report = StageReport {
            stage: "tokens".to_string(),
            first_nonce: 3,
            target: 5,
            observed_nonce: 5,
            outcomes: vec![
                OperationOutcome {
                    label: "a".to_string(),
                    nonce: 3,
                    receipt: Receipt {
                        tx_hash: TxHash::ZERO,
                        outcome_status: 0,
                        contract_address: Some(address),
                    },
                },
                OperationOutcome {
                    label: "b".to_string(),
                    nonce: 4,
                    receipt: Receipt {
                        tx_hash: TxHash::ZERO,
                        outcome_status: 0,
                        contract_address: None,
                    },
                },
            ],
        };
        assert_eq!(report.deployed("a"), Some(address));
        assert_eq!(report.deployed("b"), None);
        assert_eq!(report.nonces(), vec![3, 4]);
    }
}
