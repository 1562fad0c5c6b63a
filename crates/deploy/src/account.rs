//! The signing account that owns a run's nonce sequence.

use std::fmt;

use alloy_core::primitives::{Address, B256, keccak256};
use anyhow::Context;
use k256::ecdsa::SigningKey;

/// A secp256k1 signature split into the parts an EIP-155 transaction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: B256,
    pub s: B256,
    /// Recovery id (0 or 1).
    pub recovery_id: u8,
}

/// Signing address plus private key, fixed for the lifetime of a run.
///
/// Exactly one orchestrator may drive a given account at a time; nothing here
/// coordinates nonces across processes.
#[derive(Clone)]
pub struct Account {
    address: Address,
    signing_key: SigningKey,
}

impl Account {
    /// Build an account from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, anyhow::Error> {
        let key_hex = private_key_hex.trim().trim_start_matches("0x");
        let private_key_bytes: [u8; 32] = hex::decode(key_hex)
            .context("Private key is not valid hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("Private key must be exactly 32 bytes"))?;

        let signing_key = SigningKey::from_bytes(&private_key_bytes.into())
            .map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))?;

        // Uncompressed point: 0x04 marker followed by the 64-byte public key.
        let public_key_point = signing_key.verifying_key().to_encoded_point(false);
        let hash = keccak256(&public_key_point.as_bytes()[1..]);
        let address = Address::from_slice(&hash[12..]);

        Ok(Self {
            address,
            signing_key,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte prehash.
    pub fn sign_hash(&self, hash: &B256) -> Result<RecoverableSignature, anyhow::Error> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| anyhow::anyhow!("Failed to sign transaction hash: {}", e))?;
        let (r, s) = signature.split_bytes();

        Ok(RecoverableSignature {
            r: B256::from_slice(&r),
            s: B256::from_slice(&s),
            recovery_id: recovery_id.to_byte(),
        })
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // First well-known dev account of anvil/hardhat.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_derivation() {
        let account = Account::from_private_key(DEV_KEY).unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(account.address(), expected);
    }

    #[test]
    fn test_key_without_prefix() {
        let a = Account::from_private_key(DEV_KEY).unwrap();
        let b = Account::from_private_key(DEV_KEY.trim_start_matches("0x")).unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(Account::from_private_key("0x1234").is_err());
        assert!(Account::from_private_key("zz").is_err());
        assert!(Account::from_private_key(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let account = Account::from_private_key(DEV_KEY).unwrap();
        let printed = format!("{:?}", account);
        assert!(printed.contains("redacted"));
        assert!(!printed.contains("ac0974bec39a17e3"));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let account = Account::from_private_key(DEV_KEY).unwrap();
        let hash = keccak256(b"dexup");
        let first = account.sign_hash(&hash).unwrap();
        let second = account.sign_hash(&hash).unwrap();
        assert_eq!(first, second);
        assert!(first.recovery_id <= 1);
    }
}
