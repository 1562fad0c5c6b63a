use std::path::PathBuf;

use alloy_core::primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Default output of `merge-address`.
const DEFAULT_ADDRESS_FILE: &str = "contract_address.json";

/// Default directory of ledger snapshots.
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser)]
#[command(name = "dexup")]
#[command(
    author,
    version,
    about = "Deploy and wire exchange contracts from a single account"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "DEXUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// If not provided, ./Dexup.toml is used when it exists. Every key can be
    /// overridden with a DEXUP_ environment variable (nested keys split on `__`).
    #[arg(short, long, alias = "conf", env = "DEXUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run against an in-memory simulated ledger. Nothing is sent and the
    /// address book is read but never written.
    #[arg(long, env = "DEXUP_DRY_RUN")]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the exchange core, tokens and ledgers, then grant admin roles.
    ///
    /// Without a stage selector every stage runs.
    Deploy(DeployArgs),

    /// Resume (unpause) the exchange core.
    Resume,

    /// Pause every ledger that is not paused yet, then save its holders and balances.
    PauseLedgers(PauseLedgersArgs),

    /// Finish the migration of every ledger.
    FinishMigration(AssetArgs),

    /// Mint tokens of every mintable asset to the given recipients.
    Mint(MintArgs),

    /// Export ledger and exchange addresses for the exchange services.
    MergeAddress(MergeAddressArgs),

    /// Print the effective configuration.
    ShowConfig,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Deploy asset tokens.
    #[arg(short, long)]
    pub tokens: bool,

    /// Deploy the exchange core. On its own, also resumes it.
    #[arg(short, long)]
    pub exchange: bool,

    /// Grant the admin address its roles on the exchange core.
    #[arg(short = 'a', long)]
    pub exchange_admin: bool,

    /// Deploy one ledger per asset.
    #[arg(short, long)]
    pub ledgers: bool,

    /// Only handle this asset. Without a stage selector, deploys its token
    /// and ledger against the recorded exchange core.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Token used by ledgers whose token is not deployed in this run.
    #[arg(long)]
    pub token_address: Option<Address>,

    /// Keep addresses in memory only: nothing is loaded from or written to the address book.
    #[arg(long)]
    pub no_database: bool,
}

#[derive(Debug, Args)]
pub struct AssetArgs {
    /// Only handle this asset.
    #[arg(short, long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct PauseLedgersArgs {
    /// Only handle this asset.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Where `<asset>.dat` snapshots are written.
    #[arg(short, long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Only pause, do not read holders.
    #[arg(long)]
    pub no_export: bool,
}

#[derive(Debug, Args)]
pub struct MintArgs {
    /// Amount in the token's smallest unit.
    #[arg(long)]
    pub amount: U256,

    /// Only handle this asset.
    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(required = true)]
    pub recipients: Vec<Address>,
}

#[derive(Debug, Args)]
pub struct MergeAddressArgs {
    /// Keep entries of the existing output file that are not exported.
    #[arg(short, long)]
    pub merge: bool,

    #[arg(short, long, default_value = DEFAULT_ADDRESS_FILE)]
    pub output: PathBuf,
}
