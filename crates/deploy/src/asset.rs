//! Asset descriptors and their per-kind token deployment.

use alloy_core::primitives::{Address, Bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::contracts::{self, ContractArtifacts, ContractKind};

/// How an asset's token contract comes to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AssetKind {
    /// Wraps the chain's native coin.
    NativeCoinWrapper,
    /// A token this tool deploys and may mint.
    MintableToken,
    /// A token that already exists on-chain; never deployed here.
    External {
        address: Address,
        /// Set when the existing token wraps the native coin.
        #[serde(default)]
        native: bool,
    },
    /// Token whose minting is controlled by administrators; deployed paused.
    FaucetToken,
}

impl AssetKind {
    /// The token deployment for this kind, if it has one.
    pub fn token_deployment(
        &self,
        asset: &str,
        artifacts: &ContractArtifacts,
    ) -> Result<Option<(ContractKind, Bytes)>> {
        let (kind, args) = match self {
            Self::External { .. } => return Ok(None),
            Self::MintableToken => (
                ContractKind::MintableToken,
                contracts::mintable_token_args(asset),
            ),
            Self::NativeCoinWrapper => {
                (ContractKind::NativeWrapper, contracts::native_wrapper_args())
            }
            Self::FaucetToken => (ContractKind::FaucetToken, Vec::new()),
        };
        Ok(Some((kind, artifacts.init_code(kind, &args)?)))
    }

    pub fn is_native_wrapper(&self) -> bool {
        matches!(
            self,
            Self::NativeCoinWrapper | Self::External { native: true, .. }
        )
    }

    pub fn is_faucet(&self) -> bool {
        matches!(self, Self::FaucetToken)
    }

    pub fn is_mintable(&self) -> bool {
        matches!(self, Self::MintableToken | Self::FaucetToken)
    }
}

/// An asset entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: AssetKind,
    /// Whether resolved addresses are written to the address directory.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

impl AssetConfig {
    /// An asset selected by name alone, outside any configured list.
    pub fn adhoc(name: &str) -> Self {
        let kind = if name.eq_ignore_ascii_case("CFX") {
            AssetKind::NativeCoinWrapper
        } else {
            AssetKind::MintableToken
        };
        Self {
            name: name.to_string(),
            kind,
            persist: true,
        }
    }
}

/// Runtime state of an asset during a run.
///
/// Addresses are filled in only once a receipt confirmed the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    pub kind: AssetKind,
    pub token: Option<Address>,
    pub ledger: Option<Address>,
    pub persist: bool,
}

impl From<AssetConfig> for AssetDescriptor {
    fn from(config: AssetConfig) -> Self {
        let token = match &config.kind {
            AssetKind::External { address, .. } => Some(*address),
            _ => None,
        };
        Self {
            name: config.name,
            kind: config.kind,
            token,
            ledger: None,
            persist: config.persist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> ContractArtifacts {
        ContractArtifacts::default()
            .with_bytecode(ContractKind::MintableToken, Bytes::from_static(&[1]))
            .with_bytecode(ContractKind::NativeWrapper, Bytes::from_static(&[2]))
            .with_bytecode(ContractKind::FaucetToken, Bytes::from_static(&[3]))
    }

    #[test]
    fn test_token_deployment_dispatch() {
        let artifacts = artifacts();

        let (kind, code) = AssetKind::MintableToken
            .token_deployment("EOS", &artifacts)
            .unwrap()
            .unwrap();
        assert_eq!(kind, ContractKind::MintableToken);
        assert_eq!(code[0], 1);

        let (kind, code) = AssetKind::FaucetToken
            .token_deployment("FC", &artifacts)
            .unwrap()
            .unwrap();
        assert_eq!(kind, ContractKind::FaucetToken);
        assert_eq!(code.as_ref(), &[3]);

        let external = AssetKind::External {
            address: Address::repeat_byte(7),
            native: false,
        };
        assert!(external.token_deployment("BTC", &artifacts).unwrap().is_none());
    }

    #[test]
    fn test_missing_artifact_fails() {
        let artifacts = ContractArtifacts::default();
        assert!(AssetKind::NativeCoinWrapper
            .token_deployment("CFX", &artifacts)
            .is_err());
    }

    #[test]
    fn test_asset_config_entries() {
        #[derive(Deserialize)]
        struct Wrapper {
            assets: Vec<AssetConfig>,
        }

        let parsed: Wrapper = from_json(
            r#"{"assets": [
                {"name": "EOS", "kind": "mintable-token"},
                {"name": "BTC", "kind": "external", "address": "0x1111111111111111111111111111111111111111", "persist": false},
                {"name": "FC", "kind": "faucet-token"}
            ]}"#,
        );
        assert_eq!(parsed.assets[0].kind, AssetKind::MintableToken);
        assert!(parsed.assets[0].persist);
        assert!(matches!(parsed.assets[1].kind, AssetKind::External { .. }));
        assert!(!parsed.assets[1].persist);
        assert!(parsed.assets[2].kind.is_faucet());
    }

    #[test]
    fn test_external_native_wrapper() {
        let parsed: AssetConfig = from_json(
            r#"{"name": "CFX", "kind": "external", "address": "0x2222222222222222222222222222222222222222", "native": true}"#,
        );
        assert!(parsed.kind.is_native_wrapper());
        assert!(!parsed.kind.is_mintable());
    }

    fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> T {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_descriptor_from_external_config() {
        let address = Address::repeat_byte(9);
        let descriptor = AssetDescriptor::from(AssetConfig {
            name: "ETH".to_string(),
            kind: AssetKind::External {
                address,
                native: false,
            },
            persist: true,
        });
        assert_eq!(descriptor.token, Some(address));
        assert_eq!(descriptor.ledger, None);
    }

    #[test]
    fn test_kind_display_matches_config_tag() {
        assert_eq!(AssetKind::FaucetToken.to_string(), "faucet-token");
        assert_eq!(
            AssetKind::External {
                address: Address::ZERO,
                native: false,
            }
            .to_string(),
            "external"
        );
    }

    #[test]
    fn test_adhoc_asset() {
        assert!(AssetConfig::adhoc("cfx").kind.is_native_wrapper());
        assert_eq!(AssetConfig::adhoc("EOS").kind, AssetKind::MintableToken);
    }
}
