//! Address directory: where resolved contract addresses live between runs.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Key of the exchange core contract.
pub const EXCHANGE_CORE_KEY: &str = "exchange_core";

pub fn token_key(asset: &str) -> String {
    format!("{}.token", asset)
}

pub fn ledger_key(asset: &str) -> String {
    format!("{}.ledger", asset)
}

/// Name -> address store.
///
/// Writers only call [`set`](Self::set) after a receipt confirmed the address.
pub trait AddressDirectory: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Address>>;

    fn set(&self, key: &str, address: Address) -> Result<()>;

    fn entries(&self) -> Result<BTreeMap<String, Address>>;
}

/// Directory that keeps addresses in memory only. Nothing is loaded or persisted.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: Mutex<BTreeMap<String, Address>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from known entries. Later writes stay in memory.
    pub fn seeded(entries: BTreeMap<String, Address>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AddressDirectory for InMemoryDirectory {
    fn get(&self, key: &str) -> Result<Option<Address>> {
        Ok(lock(&self.entries).get(key).copied())
    }

    fn set(&self, key: &str, address: Address) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), address);
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, Address>> {
        Ok(lock(&self.entries).clone())
    }
}

/// Directory backed by a JSON object on disk. Every `set` rewrites the file.
#[derive(Debug)]
pub struct JsonFileDirectory {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Address>>,
}

impl JsonFileDirectory {
    /// Open the directory at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read address book {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse address book {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "Address book not found, starting empty");
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &BTreeMap<String, Address>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(entries).context("Failed to serialize address book")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write address book {}", self.path.display()))
    }
}

impl AddressDirectory for JsonFileDirectory {
    fn get(&self, key: &str) -> Result<Option<Address>> {
        Ok(lock(&self.entries).get(key).copied())
    }

    fn set(&self, key: &str, address: Address) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), address);
        self.write(&entries)?;
        tracing::info!(key, %address, path = %self.path.display(), "Address persisted");
        Ok(())
    }

    fn entries(&self) -> Result<BTreeMap<String, Address>> {
        Ok(lock(&self.entries).clone())
    }
}

/// Flatten a directory into the address file consumed by the exchange services:
/// `l<asset>_addr` for every ledger and `exchange_addr` for the core contract.
///
/// With `merge`, keys already present in `output` that are not produced here are kept.
pub fn export_address_book(
    directory: &dyn AddressDirectory,
    output: &Path,
    merge: bool,
) -> Result<BTreeMap<String, String>> {
    let mut book: Map<String, Value> = if merge && output.exists() {
        let content = std::fs::read_to_string(output)
            .with_context(|| format!("Failed to read {}", output.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", output.display()))?
    } else {
        Map::new()
    };

    let mut exported = BTreeMap::new();
    for (key, address) in directory.entries()? {
        let name = if key == EXCHANGE_CORE_KEY {
            "exchange_addr".to_string()
        } else if let Some(asset) = key.strip_suffix(".ledger") {
            format!("l{}_addr", asset.to_lowercase())
        } else {
            continue;
        };
        exported.insert(name, address.to_string());
    }

    for (name, address) in &exported {
        book.insert(name.clone(), Value::String(address.clone()));
    }

    let content = serde_json::to_string_pretty(&book).context("Failed to serialize address book")?;
    std::fs::write(output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        path = %output.display(),
        entries = exported.len(),
        merge,
        "Address book exported"
    );
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_in_memory_directory() {
        let directory = InMemoryDirectory::new();
        assert_eq!(directory.get("EOS.token").unwrap(), None);

        directory.set("EOS.token", Address::repeat_byte(1)).unwrap();
        assert_eq!(
            directory.get("EOS.token").unwrap(),
            Some(Address::repeat_byte(1))
        );
        assert_eq!(directory.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_seeded_directory_keeps_writes_in_memory() {
        let dir = TempDir::new("seeded").unwrap();
        let path = dir.path().join("addresses.json");
        let file = JsonFileDirectory::open(&path).unwrap();
        file.set(EXCHANGE_CORE_KEY, Address::repeat_byte(1)).unwrap();

        let seeded = InMemoryDirectory::seeded(file.entries().unwrap());
        seeded.set("EOS.ledger", Address::repeat_byte(2)).unwrap();
        assert_eq!(
            seeded.get(EXCHANGE_CORE_KEY).unwrap(),
            Some(Address::repeat_byte(1))
        );

        let reopened = JsonFileDirectory::open(&path).unwrap();
        assert_eq!(reopened.get("EOS.ledger").unwrap(), None);
    }

    #[test]
    fn test_json_file_directory_writes_through() {
        let dir = TempDir::new("directory").unwrap();
        let path = dir.path().join("nested").join("addresses.json");

        let directory = JsonFileDirectory::open(&path).unwrap();
        directory
            .set(&token_key("EOS"), Address::repeat_byte(0xaa))
            .unwrap();
        directory
            .set(EXCHANGE_CORE_KEY, Address::repeat_byte(0xbb))
            .unwrap();
        assert!(path.exists());

        let reopened = JsonFileDirectory::open(&path).unwrap();
        assert_eq!(
            reopened.get("EOS.token").unwrap(),
            Some(Address::repeat_byte(0xaa))
        );
        assert_eq!(
            reopened.get(EXCHANGE_CORE_KEY).unwrap(),
            Some(Address::repeat_byte(0xbb))
        );
    }

    #[test]
    fn test_export_address_book_merge() {
        let dir = TempDir::new("export").unwrap();
        let output = dir.path().join("contract_address.json");
        std::fs::write(&output, r#"{"custom_key": "keep", "leos_addr": "stale"}"#).unwrap();

        let directory = InMemoryDirectory::new();
        directory
            .set(&ledger_key("EOS"), Address::repeat_byte(1))
            .unwrap();
        directory
            .set(&token_key("EOS"), Address::repeat_byte(2))
            .unwrap();
        directory
            .set(EXCHANGE_CORE_KEY, Address::repeat_byte(3))
            .unwrap();

        let exported = export_address_book(&directory, &output, true).unwrap();
        assert_eq!(exported.len(), 2);

        let written: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["custom_key"], "keep");
        assert_eq!(
            written["leos_addr"],
            Value::String(Address::repeat_byte(1).to_string())
        );
        assert_eq!(
            written["exchange_addr"],
            Value::String(Address::repeat_byte(3).to_string())
        );
        assert!(!written.contains_key("EOS.token"));
    }

    #[test]
    fn test_export_without_merge_overwrites() {
        let dir = TempDir::new("export").unwrap();
        let output = dir.path().join("contract_address.json");
        std::fs::write(&output, r#"{"custom_key": "keep"}"#).unwrap();

        export_address_book(&InMemoryDirectory::new(), &output, false).unwrap();
        let written: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert!(written.is_empty());
    }
}
