//! Run configuration: defaults, then a TOML file, then `DEXUP_*` environment variables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, U256};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    account::Account,
    asset::AssetConfig,
    error::DeployError,
    retry::RetryPolicy,
    waiter::ConfirmationConfig,
};

pub const DEFAULT_CONFIG_FILE: &str = "Dexup.toml";
pub const ENV_PREFIX: &str = "DEXUP_";
pub const PRODUCTION_ENVIRONMENT: &str = "prod";

const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Receives whitelist-admin roles on the exchange core and the ledgers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faucet_admin: Option<Address>,
    /// Selects the asset list in `environments`.
    pub environment: String,
    pub artifacts_dir: PathBuf,
    pub address_book: PathBuf,
    /// The deployer must hold at least this much before anything is sent.
    pub min_balance_ether: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    pub retry: RetryPolicy,
    pub confirmation: ConfirmationConfig,
    pub environments: BTreeMap<String, Vec<AssetConfig>>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            private_key: None,
            admin_address: None,
            faucet_admin: None,
            environment: "test".to_string(),
            artifacts_dir: PathBuf::from("artifacts"),
            address_book: PathBuf::from("addresses.json"),
            min_balance_ether: 100,
            max_in_flight: None,
            retry: RetryPolicy::default(),
            confirmation: ConfirmationConfig::default(),
            environments: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when it exists.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) if !path.exists() => {
                anyhow::bail!("Configuration file not found: {}", path.display())
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Self::figment(&path)
            .extract()
            .context("Failed to load configuration")?;
        tracing::debug!(path = %path.display(), environment = %config.environment, "Configuration loaded");
        Ok(config)
    }

    pub fn require_rpc_url(&self) -> Result<&Url, DeployError> {
        self.rpc_url
            .as_ref()
            .ok_or(DeployError::MissingConfig("rpc_url"))
    }

    pub fn account(&self) -> Result<Account> {
        let key = self
            .private_key
            .as_deref()
            .ok_or(DeployError::MissingConfig("private_key"))?;
        Account::from_private_key(key)
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }

    pub fn min_balance(&self) -> U256 {
        U256::from(self.min_balance_ether) * U256::from(WEI_PER_ETHER)
    }

    /// Assets of the selected environment, or the single asset named `name`.
    ///
    /// A name missing from the list becomes an ad-hoc asset.
    pub fn assets(&self, name: Option<&str>) -> Result<Vec<AssetConfig>> {
        let listed = self.environments.get(&self.environment);

        let Some(name) = name else {
            return listed.cloned().with_context(|| {
                format!("No assets configured for environment `{}`", self.environment)
            });
        };

        let asset = listed
            .and_then(|assets| {
                assets
                    .iter()
                    .find(|asset| asset.name.eq_ignore_ascii_case(name))
            })
            .cloned()
            .unwrap_or_else(|| {
                tracing::info!(asset = name, "Asset not listed, using defaults for its name");
                AssetConfig::adhoc(name)
            });
        Ok(vec![asset])
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        Self {
            private_key: self.private_key.as_ref().map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::asset::AssetKind;

    const CONFIG: &str = r#"
        rpc_url = "http://localhost:8545"
        admin_address = "0x1111111111111111111111111111111111111111"
        environment = "stage"

        [retry]
        attempts = 3

        [[environments.stage]]
        name = "CFX"
        kind = "native-coin-wrapper"

        [[environments.stage]]
        name = "EOS"
        kind = "mintable-token"

        [[environments.stage]]
        name = "USDT"
        kind = "external"
        address = "0x2222222222222222222222222222222222222222"
    "#;

    #[test]
    fn test_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.interval_ms, 1_000);
        assert!(!config.retry.verify_before_resubmit);
        assert_eq!(config.confirmation.max_polls, None);
        assert_eq!(
            config.min_balance(),
            U256::from(100u64) * U256::from(WEI_PER_ETHER)
        );
        assert!(!config.is_production());
    }

    #[test]
    fn test_load_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, CONFIG)?;
            jail.set_env("DEXUP_RETRY__INTERVAL_MS", "250");
            jail.set_env("DEXUP_PRIVATE_KEY", "abcdef");

            let config = DeployConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.environment, "stage");
            assert_eq!(config.retry.attempts, 3);
            assert_eq!(config.retry.interval_ms, 250);
            assert_eq!(config.private_key.as_deref(), Some("abcdef"));
            assert!(config.require_rpc_url().is_ok());

            let assets = config.assets(None).map_err(|e| e.to_string())?;
            assert_eq!(assets.len(), 3);
            assert!(assets[0].kind.is_native_wrapper());
            assert!(matches!(assets[2].kind, AssetKind::External { .. }));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            assert!(DeployConfig::load(Some(Path::new("missing.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_missing_credentials_are_reported() {
        let config = DeployConfig::default();
        assert!(matches!(
            config.require_rpc_url(),
            Err(DeployError::MissingConfig("rpc_url"))
        ));
        let err = config.account().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::MissingConfig("private_key"))
        ));
    }

    #[test]
    fn test_single_asset_selection() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, CONFIG)?;
            let config = DeployConfig::load(None).map_err(|e| e.to_string())?;

            let usdt = config.assets(Some("usdt")).map_err(|e| e.to_string())?;
            assert_eq!(usdt.len(), 1);
            assert!(matches!(usdt[0].kind, AssetKind::External { .. }));

            let adhoc = config.assets(Some("BTC")).map_err(|e| e.to_string())?;
            assert_eq!(adhoc[0].kind, AssetKind::MintableToken);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_environment() {
        let config = DeployConfig {
            environment: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(config.assets(None).is_err());
    }

    #[test]
    fn test_redacted() {
        let config = DeployConfig {
            private_key: Some("0xsecret".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.redacted().private_key.as_deref(),
            Some("<redacted>")
        );
    }
}
