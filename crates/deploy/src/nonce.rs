//! Local nonce bookkeeping for the run's single signing account.

use alloy_core::primitives::Address;

use crate::{error::TxError, ledger::Ledger};

/// Hands out unique, increasing nonces for one account.
///
/// The local value is only a candidate: it is seeded from the ledger and
/// re-synced at stage boundaries, never mid-stage. [`allocate`](Self::allocate)
/// takes `&mut self` and never suspends, so allocations in a dispatch loop are
/// always distinct even while the operations that consume them are in flight.
#[derive(Debug)]
pub struct NonceAllocator {
    address: Address,
    next: u64,
}

impl NonceAllocator {
    /// Seed the allocator from the ledger's next nonce for `address`.
    pub async fn initialize<L: Ledger>(ledger: &L, address: Address) -> Result<Self, TxError> {
        let next = ledger.next_nonce(address).await?;
        tracing::info!(%address, next_nonce = next, "Nonce allocator initialized");
        Ok(Self { address, next })
    }

    /// Start from a known nonce without querying the ledger.
    pub fn starting_at(address: Address, next: u64) -> Self {
        Self { address, next }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The nonce the next call to [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn allocate(&mut self) -> u64 {
        let nonce = self.next;
        self.next += 1;
        nonce
    }

    /// Replace the local base with the ledger's value. Only call at a stage boundary.
    pub async fn resync<L: Ledger>(&mut self, ledger: &L) -> Result<u64, TxError> {
        let observed = ledger.next_nonce(self.address).await?;
        Ok(self.rebase(observed))
    }

    /// Adopt a next-nonce value the caller just read from the ledger.
    pub fn rebase(&mut self, observed: u64) -> u64 {
        if observed != self.next {
            // Another writer used the account, or transactions are still pending.
            tracing::warn!(
                address = %self.address,
                local = self.next,
                observed,
                "Nonce drift detected at stage boundary"
            );
        }
        self.next = observed;
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedLedger;

    #[test]
    fn test_allocations_are_contiguous_and_distinct() {
        let mut allocator = NonceAllocator::starting_at(Address::ZERO, 10);
        let nonces: Vec<u64> = (0..3).map(|_| allocator.allocate()).collect();
        assert_eq!(nonces, vec![10, 11, 12]);
        assert_eq!(allocator.peek(), 13);
    }

    #[tokio::test]
    async fn test_initialize_and_resync_follow_the_ledger() {
        let address = Address::repeat_byte(1);
        let ledger = SimulatedLedger::new().with_nonce(address, 4);

        let mut allocator = NonceAllocator::initialize(&ledger, address).await.unwrap();
        assert_eq!(allocator.allocate(), 4);
        assert_eq!(allocator.allocate(), 5);

        // Nothing was sent, so the ledger still reports 4.
        assert_eq!(allocator.resync(&ledger).await.unwrap(), 4);
        assert_eq!(allocator.peek(), 4);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_the_ledger_is_unreachable() {
        let ledger = SimulatedLedger::new();
        ledger.fail_next_nonce_queries(1);
        assert!(NonceAllocator::initialize(&ledger, Address::ZERO).await.is_err());
    }
}
