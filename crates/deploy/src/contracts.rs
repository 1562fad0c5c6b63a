//! Contract artifacts, constructor arguments and call payloads.

use std::{collections::HashMap, path::Path};

use alloy_core::primitives::{Address, Bytes, U256};
use alloy_sol_types::{SolCall, SolType, SolValue, sol, sol_data};
use anyhow::{Context, Result};
use serde::Deserialize;
use strum::IntoEnumIterator;

sol! {
    interface IExchangeCore {
        function addWhitelisted(address account) external;
        function addWhitelistAdmin(address account) external;
        function Resume() external;
    }

    interface ILedger {
        function addWhitelistAdmin(address account) external;
        function Pause() external;
        function paused() external view returns (bool);
        function finishMigration() external;
        function totalSupply() external view returns (uint256);
        function accountTotal() external view returns (uint256);
        function accountList(uint256 offset) external view returns (address[]);
        function balanceOf(address account) external view returns (uint256);
    }

    interface IFaucetToken {
        function unpause() external;
        function addAdmin(address account) external;
        function mint(address to, uint256 amount) external;
    }

    interface IMintableToken {
        function mint(address to, uint256 amount, bytes userData, bytes operatorData) external;
    }
}

/// Withdrawal lock applied by every ledger contract: three days.
pub const LEDGER_LOCK_SECONDS: u64 = 259_200;

/// Decimals of every ledger contract.
pub const LEDGER_DECIMALS: u8 = 18;

/// The contracts this tool knows how to deploy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::EnumString,
)]
pub enum ContractKind {
    ExchangeCore,
    MintableToken,
    NativeWrapper,
    FaucetToken,
    Ledger,
}

impl ContractKind {
    pub fn artifact_file(&self) -> String {
        format!("{}.json", self)
    }
}

/// Compiler output file. Accepts both `"bytecode": "0x.."` and `"bytecode": {"object": "0x.."}`.
#[derive(Debug, Deserialize)]
struct ArtifactFile {
    bytecode: BytecodeField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Hex(Bytes),
    Object { object: Bytes },
}

/// Creation bytecode for each [`ContractKind`] found in an artifacts directory.
#[derive(Debug, Clone, Default)]
pub struct ContractArtifacts {
    bytecode: HashMap<ContractKind, Bytes>,
}

impl ContractArtifacts {
    /// Load every artifact present in `dir`. Missing files only fail when the
    /// corresponding contract is actually deployed.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut bytecode = HashMap::new();
        for kind in ContractKind::iter() {
            let path = dir.join(kind.artifact_file());
            if !path.exists() {
                tracing::debug!(path = %path.display(), "Artifact not present");
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let artifact: ArtifactFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse artifact {}", path.display()))?;
            let code = match artifact.bytecode {
                BytecodeField::Hex(code) | BytecodeField::Object { object: code } => code,
            };
            bytecode.insert(kind, code);
        }
        Ok(Self { bytecode })
    }

    pub fn with_bytecode(mut self, kind: ContractKind, code: Bytes) -> Self {
        self.bytecode.insert(kind, code);
        self
    }

    /// Fill every missing artifact with empty bytecode. Only meaningful against
    /// a ledger that does not execute code, such as the simulated one.
    pub fn with_placeholders(mut self) -> Self {
        for kind in ContractKind::iter() {
            self.bytecode.entry(kind).or_default();
        }
        self
    }

    pub fn bytecode(&self, kind: ContractKind) -> Result<&Bytes> {
        self.bytecode
            .get(&kind)
            .with_context(|| format!("No artifact loaded for {} ({})", kind, kind.artifact_file()))
    }

    /// Creation code followed by ABI-encoded constructor arguments.
    pub fn init_code(&self, kind: ContractKind, constructor_args: &[u8]) -> Result<Bytes> {
        let code = self.bytecode(kind)?;
        Ok([code.as_ref(), constructor_args].concat().into())
    }
}

pub fn mintable_token_args(asset: &str) -> Vec<u8> {
    (
        format!("Dex {}", asset),
        format!("K-{}", asset),
        Vec::<Address>::new(),
    )
        .abi_encode_params()
}

pub fn native_wrapper_args() -> Vec<u8> {
    (Vec::<Address>::new(),).abi_encode_params()
}

pub fn ledger_args(asset: &str, token: Address, exchange: Address, native_wrapper: bool) -> Vec<u8> {
    <(
        sol_data::String,
        sol_data::String,
        sol_data::Uint<8>,
        sol_data::Address,
        sol_data::Address,
        sol_data::Uint<256>,
        sol_data::Bool,
    ) as SolType>::abi_encode_params(&(
        format!("Ledger {}", asset),
        format!("L-{}", asset),
        LEDGER_DECIMALS,
        token,
        exchange,
        U256::from(LEDGER_LOCK_SECONDS),
        native_wrapper,
    ))
}

pub fn add_whitelisted(account: Address) -> Bytes {
    IExchangeCore::addWhitelistedCall { account }.abi_encode().into()
}

pub fn exchange_add_whitelist_admin(account: Address) -> Bytes {
    IExchangeCore::addWhitelistAdminCall { account }.abi_encode().into()
}

pub fn exchange_resume() -> Bytes {
    IExchangeCore::ResumeCall {}.abi_encode().into()
}

pub fn ledger_add_whitelist_admin(account: Address) -> Bytes {
    ILedger::addWhitelistAdminCall { account }.abi_encode().into()
}

pub fn ledger_pause() -> Bytes {
    ILedger::PauseCall {}.abi_encode().into()
}

pub fn ledger_paused() -> Bytes {
    ILedger::pausedCall {}.abi_encode().into()
}

pub fn decode_paused(output: &[u8]) -> Result<bool> {
    Ok(ILedger::pausedCall::abi_decode_returns(output, true)
        .context("Failed to decode paused() result")?
        ._0)
}

/// Read-only ledger calls used to snapshot holders before a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRead {
    Paused,
    TotalSupply,
    AccountTotal,
    /// One page of holders starting at `offset`.
    AccountList(U256),
    BalanceOf(Address),
}

impl LedgerRead {
    pub fn encode(&self) -> Bytes {
        match *self {
            Self::Paused => ledger_paused(),
            Self::TotalSupply => ILedger::totalSupplyCall {}.abi_encode().into(),
            Self::AccountTotal => ILedger::accountTotalCall {}.abi_encode().into(),
            Self::AccountList(offset) => ILedger::accountListCall { offset }.abi_encode().into(),
            Self::BalanceOf(account) => ILedger::balanceOfCall { account }.abi_encode().into(),
        }
    }

    /// Recognize call data produced by [`encode`](Self::encode).
    pub fn decode(input: &[u8]) -> Option<Self> {
        let selector = input.get(..4)?;
        if selector == ILedger::pausedCall::SELECTOR {
            Some(Self::Paused)
        } else if selector == ILedger::totalSupplyCall::SELECTOR {
            Some(Self::TotalSupply)
        } else if selector == ILedger::accountTotalCall::SELECTOR {
            Some(Self::AccountTotal)
        } else if selector == ILedger::accountListCall::SELECTOR {
            let call = ILedger::accountListCall::abi_decode(input, true).ok()?;
            Some(Self::AccountList(call.offset))
        } else if selector == ILedger::balanceOfCall::SELECTOR {
            let call = ILedger::balanceOfCall::abi_decode(input, true).ok()?;
            Some(Self::BalanceOf(call.account))
        } else {
            None
        }
    }
}

/// Decode the output of `totalSupply()`, `accountTotal()` or `balanceOf()`.
pub fn decode_uint(output: &[u8]) -> Result<U256> {
    U256::abi_decode(output, true).context("Failed to decode uint256 result")
}

pub fn decode_account_list(output: &[u8]) -> Result<Vec<Address>> {
    Ok(ILedger::accountListCall::abi_decode_returns(output, true)
        .context("Failed to decode accountList() result")?
        ._0)
}

pub fn ledger_finish_migration() -> Bytes {
    ILedger::finishMigrationCall {}.abi_encode().into()
}

pub fn faucet_unpause() -> Bytes {
    IFaucetToken::unpauseCall {}.abi_encode().into()
}

pub fn faucet_add_admin(account: Address) -> Bytes {
    IFaucetToken::addAdminCall { account }.abi_encode().into()
}

pub fn faucet_mint(to: Address, amount: U256) -> Bytes {
    IFaucetToken::mintCall { to, amount }.abi_encode().into()
}

pub fn mintable_mint(to: Address, amount: U256) -> Bytes {
    IMintableToken::mintCall {
        to,
        amount,
        userData: Bytes::new(),
        operatorData: Bytes::new(),
    }
    .abi_encode()
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_load_artifacts_both_layouts() {
        let dir = TempDir::new("artifacts").unwrap();
        std::fs::write(
            dir.path().join("ExchangeCore.json"),
            r#"{"abi": [], "bytecode": "0x6080"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("Ledger.json"),
            r#"{"bytecode": {"object": "0x60806040"}}"#,
        )
        .unwrap();

        let artifacts = ContractArtifacts::load(dir.path()).unwrap();
        assert_eq!(
            artifacts.bytecode(ContractKind::ExchangeCore).unwrap().as_ref(),
            &[0x60, 0x80]
        );
        assert_eq!(artifacts.bytecode(ContractKind::Ledger).unwrap().len(), 4);
        assert!(artifacts.bytecode(ContractKind::FaucetToken).is_err());
    }

    #[test]
    fn test_placeholders_keep_loaded_bytecode() {
        let artifacts = ContractArtifacts::default()
            .with_bytecode(ContractKind::Ledger, Bytes::from_static(&[0x60]))
            .with_placeholders();
        assert_eq!(artifacts.bytecode(ContractKind::Ledger).unwrap().len(), 1);
        assert!(artifacts.bytecode(ContractKind::ExchangeCore).unwrap().is_empty());
    }

    #[test]
    fn test_init_code_appends_args() {
        let artifacts = ContractArtifacts::default()
            .with_bytecode(ContractKind::NativeWrapper, Bytes::from_static(&[0xaa, 0xbb]));
        let args = native_wrapper_args();
        let init = artifacts.init_code(ContractKind::NativeWrapper, &args).unwrap();
        assert_eq!(&init[..2], &[0xaa, 0xbb]);
        assert_eq!(&init[2..], args.as_slice());
    }

    #[test]
    fn test_ledger_args_layout() {
        let token = Address::repeat_byte(0x11);
        let exchange = Address::repeat_byte(0x22);
        let args = ledger_args("EOS", token, exchange, false);
        // Seven head words, then two dynamic strings (length word + one data word each).
        assert_eq!(args.len(), 32 * 7 + 32 * 4);
        assert_eq!(&args[32 * 3 + 12..32 * 4], token.as_slice());
        assert_eq!(&args[32 * 4 + 12..32 * 5], exchange.as_slice());
    }

    #[test]
    fn test_call_selectors() {
        assert_eq!(&ledger_paused()[..], &ILedger::pausedCall::SELECTOR[..]);
        assert_eq!(add_whitelisted(Address::ZERO).len(), 4 + 32);
        assert_eq!(mintable_mint(Address::ZERO, U256::from(1)).len(), 4 + 32 * 6);
    }

    #[test]
    fn test_decode_paused() {
        let encoded = true.abi_encode();
        assert!(decode_paused(&encoded).unwrap());
        assert!(!decode_paused(&false.abi_encode()).unwrap());
    }

    #[test]
    fn test_ledger_reads_are_recognized() {
        let holder = Address::repeat_byte(0x42);
        for read in [
            LedgerRead::Paused,
            LedgerRead::TotalSupply,
            LedgerRead::AccountTotal,
            LedgerRead::AccountList(U256::from(100)),
            LedgerRead::BalanceOf(holder),
        ] {
            assert_eq!(LedgerRead::decode(&read.encode()), Some(read));
        }
        assert_eq!(LedgerRead::decode(&ledger_pause()), None);
        assert_eq!(LedgerRead::decode(&[0x01]), None);
    }

    #[test]
    fn test_decode_account_list() {
        let holders = vec![Address::repeat_byte(1), Address::ZERO];
        let output = (holders.clone(),).abi_encode_params();
        assert_eq!(decode_account_list(&output).unwrap(), holders);
        assert_eq!(decode_uint(&U256::from(7).abi_encode()).unwrap(), U256::from(7));
    }

    #[test]
    fn test_contract_kind_names() {
        assert_eq!(ContractKind::NativeWrapper.artifact_file(), "NativeWrapper.json");
        assert_eq!("Ledger".parse::<ContractKind>().unwrap(), ContractKind::Ledger);
    }
}
