//! In-memory [`Ledger`] for tests and dry runs.
//!
//! Sent transactions wait in a pool and are executed in per-account nonce
//! order whenever any ledger method is called. A transaction whose nonce is
//! ahead of the account's counter stays pooled until the gap is filled.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use alloy_core::primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::SolValue;

use crate::{
    contracts::{self, LedgerRead},
    error::TxError,
    ledger::{Ledger, Receipt},
    rpc::RpcError,
    tx::SignedTransaction,
};

pub const SIM_CHAIN_ID: u64 = 1337;
pub const SIM_GAS_PRICE: u128 = 1_000_000_000;
/// Length of every `accountList` page, padded with the zero address.
pub const SIM_ACCOUNT_PAGE: usize = 100;

#[derive(Debug, Default)]
struct Faults {
    failing_sends: usize,
    lost_send_responses: usize,
    failing_nonce_queries: usize,
    failing_receipt_queries: usize,
    failing_calls: usize,
    reverting_nonces: HashSet<u64>,
}

#[derive(Debug, Default)]
struct SimState {
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    pool: BTreeMap<(Address, u64), SignedTransaction>,
    receipts: HashMap<TxHash, Receipt>,
    paused: HashSet<Address>,
    /// Holders and balances of each ledger contract.
    holders: HashMap<Address, Vec<(Address, U256)>>,
    sent: Vec<SignedTransaction>,
    mined: Vec<SignedTransaction>,
    mine_per_call: Option<usize>,
    faults: Faults,
}

impl SimState {
    /// Execute pooled transactions whose nonce matches their sender's counter.
    fn mine(&mut self) -> usize {
        let mut mined = 0;
        loop {
            if self.mine_per_call.is_some_and(|max| mined >= max) {
                return mined;
            }
            let ready = self
                .pool
                .keys()
                .find(|(from, nonce)| self.nonces.get(from).copied().unwrap_or_default() == *nonce)
                .copied();
            let Some(key) = ready else {
                return mined;
            };
            if let Some(tx) = self.pool.remove(&key) {
                self.execute(tx);
                mined += 1;
            }
        }
    }

    fn execute(&mut self, tx: SignedTransaction) {
        let nonce = tx.request.nonce;
        let reverted = self.faults.reverting_nonces.remove(&nonce);

        let contract_address = match tx.request.to {
            None if !reverted => Some(tx.from.create(nonce)),
            _ => None,
        };
        if let (Some(to), false) = (tx.request.to, reverted) {
            self.apply_call(to, &tx.request.input);
        }

        tracing::debug!(from = %tx.from, nonce, tx_hash = %tx.hash, reverted, "Simulated transaction mined");
        self.receipts.insert(
            tx.hash,
            Receipt {
                tx_hash: tx.hash,
                outcome_status: u64::from(reverted),
                contract_address,
            },
        );
        *self.nonces.entry(tx.from).or_default() += 1;
        self.mined.push(tx);
    }

    fn apply_call(&mut self, to: Address, input: &[u8]) {
        let selector = input.get(..4);
        if selector == Some(&contracts::ledger_pause()[..]) {
            self.paused.insert(to);
        } else if selector == Some(&contracts::exchange_resume()[..])
            || selector == Some(&contracts::faucet_unpause()[..])
        {
            self.paused.remove(&to);
        }
    }
}

fn node_error(message: &str) -> TxError {
    TxError::Rpc(anyhow::Error::new(RpcError {
        code: -32000,
        message: message.to_string(),
    }))
}

/// A single-node chain living in memory.
#[derive(Debug)]
pub struct SimulatedLedger {
    chain_id: u64,
    state: Mutex<SimState>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            chain_id: SIM_CHAIN_ID,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mined_state(&self) -> MutexGuard<'_, SimState> {
        let mut state = self.state();
        state.mine();
        state
    }

    /// Set the account's next nonce, as if it had already sent `nonce` transactions.
    pub fn with_nonce(self, address: Address, nonce: u64) -> Self {
        self.state().nonces.insert(address, nonce);
        self
    }

    pub fn with_balance(self, address: Address, balance: U256) -> Self {
        self.state().balances.insert(address, balance);
        self
    }

    /// Execute at most `max` pooled transactions per ledger call. `None` executes all.
    pub fn set_mine_per_call(&self, max: Option<usize>) {
        self.state().mine_per_call = max;
    }

    /// The next `count` sends fail without reaching the pool.
    pub fn fail_next_sends(&self, count: usize) {
        self.state().faults.failing_sends = count;
    }

    /// The next `count` sends are accepted but reported to the caller as failed.
    pub fn lose_next_send_responses(&self, count: usize) {
        self.state().faults.lost_send_responses = count;
    }

    pub fn fail_next_nonce_queries(&self, count: usize) {
        self.state().faults.failing_nonce_queries = count;
    }

    pub fn fail_next_receipt_queries(&self, count: usize) {
        self.state().faults.failing_receipt_queries = count;
    }

    /// The next `count` read-only calls fail.
    pub fn fail_next_calls(&self, count: usize) {
        self.state().faults.failing_calls = count;
    }

    /// The transaction mined with this nonce reports a nonzero outcome.
    pub fn revert_nonce(&self, nonce: u64) {
        self.state().faults.reverting_nonces.insert(nonce);
    }

    pub fn set_paused(&self, address: Address, paused: bool) {
        let mut state = self.state();
        if paused {
            state.paused.insert(address);
        } else {
            state.paused.remove(&address);
        }
    }

    /// Give the ledger contract at `ledger` these holders, in registration order.
    pub fn set_holders(&self, ledger: Address, holders: Vec<(Address, U256)>) {
        self.state().holders.insert(ledger, holders);
    }

    pub fn is_paused(&self, address: Address) -> bool {
        self.mined_state().paused.contains(&address)
    }

    /// Every transaction accepted into the pool, in arrival order.
    pub fn sent_transactions(&self) -> Vec<SignedTransaction> {
        self.state().sent.clone()
    }

    /// Every executed transaction, in execution order.
    pub fn mined_transactions(&self) -> Vec<SignedTransaction> {
        self.mined_state().mined.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pool.len()
    }
}

impl Ledger for SimulatedLedger {
    async fn chain_id(&self) -> Result<u64, TxError> {
        Ok(self.chain_id)
    }

    async fn next_nonce(&self, address: Address) -> Result<u64, TxError> {
        let mut state = self.mined_state();
        if state.faults.failing_nonce_queries > 0 {
            state.faults.failing_nonce_queries -= 1;
            return Err(TxError::Rpc(anyhow::anyhow!("simulated nonce query failure")));
        }
        Ok(state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, TxError> {
        Ok(self
            .mined_state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128, TxError> {
        Ok(SIM_GAS_PRICE)
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        to: Option<Address>,
        _input: &Bytes,
    ) -> Result<u64, TxError> {
        Ok(if to.is_some() { 100_000 } else { 3_000_000 })
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, TxError> {
        let mut state = self.mined_state();

        if state.faults.failing_sends > 0 {
            state.faults.failing_sends -= 1;
            return Err(TxError::Rpc(anyhow::anyhow!("simulated connection reset")));
        }

        if tx.request.chain_id != self.chain_id {
            return Err(node_error("invalid chain id"));
        }

        let key = (tx.from, tx.request.nonce);
        if let Some(pooled) = state.pool.get(&key) {
            return if pooled.hash == tx.hash {
                Ok(tx.hash)
            } else {
                Err(node_error("replacement transaction underpriced"))
            };
        }

        let expected = state.nonces.get(&tx.from).copied().unwrap_or_default();
        if tx.request.nonce < expected {
            return Err(node_error("nonce too low"));
        }

        state.pool.insert(key, tx.clone());
        state.sent.push(tx.clone());

        if state.faults.lost_send_responses > 0 {
            state.faults.lost_send_responses -= 1;
            return Err(TxError::Rpc(anyhow::anyhow!("simulated response timeout")));
        }
        Ok(tx.hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, TxError> {
        let mut state = self.mined_state();
        if state.faults.failing_receipt_queries > 0 {
            state.faults.failing_receipt_queries -= 1;
            return Err(TxError::Rpc(anyhow::anyhow!("simulated receipt query failure")));
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, TxError> {
        let mut state = self.mined_state();
        if state.faults.failing_calls > 0 {
            state.faults.failing_calls -= 1;
            return Err(TxError::Rpc(anyhow::anyhow!("simulated call failure")));
        }
        let holders = state.holders.get(&to).map(Vec::as_slice).unwrap_or_default();

        let output = match LedgerRead::decode(&input) {
            Some(LedgerRead::Paused) => state.paused.contains(&to).abi_encode(),
            Some(LedgerRead::TotalSupply) => holders
                .iter()
                .fold(U256::ZERO, |total, (_, balance)| total + *balance)
                .abi_encode(),
            Some(LedgerRead::AccountTotal) => U256::from(holders.len()).abi_encode(),
            Some(LedgerRead::AccountList(offset)) => {
                let offset = usize::try_from(offset).unwrap_or(usize::MAX);
                let mut page: Vec<Address> = holders
                    .iter()
                    .skip(offset)
                    .take(SIM_ACCOUNT_PAGE)
                    .map(|(holder, _)| *holder)
                    .collect();
                page.resize(SIM_ACCOUNT_PAGE, Address::ZERO);
                (page,).abi_encode_params()
            }
            Some(LedgerRead::BalanceOf(account)) => holders
                .iter()
                .find(|(holder, _)| *holder == account)
                .map(|(_, balance)| *balance)
                .unwrap_or_default()
                .abi_encode(),
            None => Vec::new(),
        };
        Ok(output.into())
    }
}
