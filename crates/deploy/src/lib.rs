//! dexup-deploy - Nonce-sequenced deployment of exchange contracts.
//!
//! This crate deploys and wires together an exchange core, per-asset tokens and
//! per-asset ledgers from a single signing account. Operations are grouped in
//! stages: every operation of a stage gets its nonce before dispatch, all of
//! them run concurrently, and the next stage only starts once the ledger has
//! confirmed the whole stage.

pub mod account;
pub use account::Account;

pub mod asset;
pub use asset::{AssetConfig, AssetDescriptor, AssetKind};

pub mod config;
pub use config::DeployConfig;

pub mod contracts;
pub use contracts::{ContractArtifacts, ContractKind};

pub mod directory;
pub use directory::{AddressDirectory, InMemoryDirectory, JsonFileDirectory, export_address_book};

mod error;
pub use error::{DeployError, TxError};

pub mod ledger;
pub use ledger::{JsonRpcLedger, Ledger, PendingTransaction, Receipt};

pub mod nonce;
pub use nonce::NonceAllocator;

pub mod orchestrator;
pub use orchestrator::{DeployPlan, DeployReport, Orchestrator, RunContext};

pub mod retry;
pub use retry::RetryPolicy;

pub mod rpc;

pub mod sim;
pub use sim::SimulatedLedger;

pub mod snapshot;
pub use snapshot::LedgerSnapshot;

pub mod stage;
pub use stage::{Action, Operation, OperationOutcome, Stage, StageReport};

pub mod submitter;
pub use submitter::TransactionSubmitter;

pub mod tx;
pub use tx::{SignedTransaction, TxRequest};

pub mod waiter;
pub use waiter::{ConfirmationConfig, ConfirmationWaiter, PollPolicy};
