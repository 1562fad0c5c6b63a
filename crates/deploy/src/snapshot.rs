//! Holder snapshots taken from paused ledgers before a migration.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Holders are listed this many at a time by `accountList(offset)`.
pub const ACCOUNT_PAGE_SIZE: usize = 100;

/// Supply and balances of one ledger, as written to `<asset>.dat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub address: Address,
    pub total_supply: U256,
    /// Holders in the ledger's registration order.
    pub accounts: Vec<Address>,
    pub balances: BTreeMap<Address, U256>,
}

impl LedgerSnapshot {
    pub fn new(address: Address, total_supply: U256) -> Self {
        Self {
            address,
            total_supply,
            accounts: Vec::new(),
            balances: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, account: Address, balance: U256) {
        self.accounts.push(account);
        self.balances.insert(account, balance);
    }

    /// Sum of every recorded balance.
    pub fn total_balance(&self) -> U256 {
        self.balances
            .values()
            .fold(U256::ZERO, |total, balance| total + *balance)
    }

    /// Write the snapshot to `<dir>/<asset>.dat` as indented JSON.
    ///
    /// # Arguments
    /// * `dir` - Output directory, created when missing
    /// * `asset` - Asset name, used as the file stem
    ///
    /// # Returns
    /// The path of the written file.
    pub fn write(&self, dir: &Path, asset: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}.dat", asset));
        let mut content = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut content, formatter);
        self.serialize(&mut serializer)
            .with_context(|| format!("Failed to serialize the snapshot of {}", asset))?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(
            asset,
            accounts = self.accounts.len(),
            path = %path.display(),
            "Ledger snapshot saved"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_snapshot_file_layout() {
        let dir = TempDir::new("snapshot").unwrap();
        let mut snapshot = LedgerSnapshot::new(Address::repeat_byte(9), U256::from(30));
        snapshot.push(Address::repeat_byte(1), U256::from(10));
        snapshot.push(Address::repeat_byte(2), U256::from(20));
        assert_eq!(snapshot.total_balance(), U256::from(30));

        let path = snapshot.write(&dir.path().join("data"), "EOS").unwrap();
        assert!(path.ends_with("data/EOS.dat"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n    \"totalSupply\": \"0x1e\""));

        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["accounts"].as_array().unwrap().len(), 2);
        assert_eq!(
            value["balances"][Address::repeat_byte(2).to_string()],
            serde_json::json!("0x14")
        );

        let read: LedgerSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(read, snapshot);
    }
}
