//! dexup deploys and wires exchange contracts from a single signing account.

mod cli;

use std::sync::Arc;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use backon::Sleeper;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use dexup_deploy::{
    AddressDirectory, ContractArtifacts, DeployConfig, DeployPlan, DeployReport,
    InMemoryDirectory, JsonFileDirectory, JsonRpcLedger, Ledger, Orchestrator, RunContext,
    SimulatedLedger, StageReport, export_address_book,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let result = run(cli).await;
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "Run aborted");
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = DeployConfig::load(cli.config.as_deref())?;
    tracing::info!(
        environment = %config.environment,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    match cli.command {
        Command::ShowConfig => {
            let content = toml::to_string_pretty(&config.redacted())
                .context("Failed to serialize configuration to TOML")?;
            println!("{content}");
            return Ok(());
        }
        Command::MergeAddress(args) => {
            let directory = JsonFileDirectory::open(&config.address_book)?;
            let exported = export_address_book(&directory, &args.output, args.merge)?;

            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["Key", "Address"]);
            for (key, address) in exported {
                table.add_row(vec![key, address]);
            }
            println!("{table}");
            return Ok(());
        }
        _ => {}
    }

    let account = config.account()?;
    let no_database = matches!(&cli.command, Command::Deploy(args) if args.no_database);

    let directory: Arc<dyn AddressDirectory> = if no_database {
        tracing::info!("Database disabled, addresses are kept in memory");
        Arc::new(InMemoryDirectory::new())
    } else if cli.dry_run {
        let book = JsonFileDirectory::open(&config.address_book)?;
        Arc::new(InMemoryDirectory::seeded(book.entries()?))
    } else {
        Arc::new(JsonFileDirectory::open(&config.address_book)?)
    };

    if cli.dry_run {
        let ledger = SimulatedLedger::new().with_balance(account.address(), config.min_balance());
        let ctx = RunContext::connect(
            ledger,
            account,
            directory,
            config.retry,
            config.confirmation,
        )
        .await?;
        execute(ctx, &config, cli.command, true).await
    } else {
        let url = config.require_rpc_url()?.clone();
        tracing::info!(rpc_url = %url, "Using ledger endpoint");
        let ledger = JsonRpcLedger::new(url)?;
        let ctx = RunContext::connect(
            ledger,
            account,
            directory,
            config.retry,
            config.confirmation,
        )
        .await?;
        execute(ctx, &config, cli.command, false).await
    }
}

async fn execute<L: Ledger, S: Sleeper + Clone>(
    ctx: RunContext<L, S>,
    config: &DeployConfig,
    command: Command,
    dry_run: bool,
) -> Result<()> {
    let mut orchestrator = Orchestrator::new(ctx).await?;

    match command {
        Command::Deploy(args) => {
            let mut artifacts = ContractArtifacts::load(&config.artifacts_dir)?;
            if dry_run {
                artifacts = artifacts.with_placeholders();
            }

            let selection: fn(bool, bool, bool, bool) -> DeployPlan = if args.name.is_some() {
                DeployPlan::select_for_asset
            } else {
                DeployPlan::select
            };
            let plan = DeployPlan {
                token_override: args.token_address,
                admin: config.admin_address,
                faucet_admin: config.faucet_admin,
                production: config.is_production(),
                min_balance: config.min_balance(),
                max_in_flight: config.max_in_flight,
                ..selection(args.tokens, args.exchange, args.exchange_admin, args.ledgers)
            };
            let assets = config.assets(args.name.as_deref())?;

            let report = orchestrator.deploy(&plan, &artifacts, assets).await?;
            print_stages(&report.stages);
            print_addresses(&report);
        }
        Command::Resume => {
            let report = orchestrator.resume_exchange().await?;
            print_stages(&[report]);
        }
        Command::PauseLedgers(args) => {
            let assets = config.assets(args.name.as_deref())?;
            let report = orchestrator.pause_ledgers(&assets).await?;
            print_stages(&[report]);

            if dry_run {
                tracing::info!("Dry run, ledger snapshots are not written");
            } else if !args.no_export {
                let written = orchestrator.export_ledgers(&assets, &args.data_dir).await?;
                let mut table = Table::new();
                table.load_preset(UTF8_FULL).set_header(vec!["Asset", "Snapshot"]);
                for (asset, path) in written {
                    table.add_row(vec![asset, path.display().to_string()]);
                }
                println!("{table}");
            }
        }
        Command::FinishMigration(args) => {
            let assets = config.assets(args.name.as_deref())?;
            let report = orchestrator.finish_migration(&assets).await?;
            print_stages(&[report]);
        }
        Command::Mint(args) => {
            let assets = config.assets(args.name.as_deref())?;
            let report = orchestrator
                .mint(&assets, &args.recipients, args.amount)
                .await?;
            print_stages(&[report]);
        }
        Command::ShowConfig | Command::MergeAddress(_) => {}
    }

    Ok(())
}

fn print_stages(stages: &[StageReport]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Stage", "Nonce", "Operation", "Tx hash"]);
    for stage in stages {
        for outcome in &stage.outcomes {
            table.add_row(vec![
                stage.stage.clone(),
                outcome.nonce.to_string(),
                outcome.label.clone(),
                outcome.receipt.tx_hash.to_string(),
            ]);
        }
    }
    println!("{table}");
}

fn print_addresses(report: &DeployReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Asset", "Kind", "Token", "Ledger"]);

    if let Some(exchange) = report.exchange {
        table.add_row(vec![
            "exchange core".to_string(),
            "-".to_string(),
            "-".to_string(),
            exchange.to_string(),
        ]);
    }
    for asset in &report.assets {
        table.add_row(vec![
            asset.name.clone(),
            asset.kind.to_string(),
            show_address(asset.token),
            show_address(asset.ledger),
        ]);
    }
    println!("{table}");
}

fn show_address(address: Option<Address>) -> String {
    address.map_or_else(|| "-".to_string(), |address| address.to_string())
}
