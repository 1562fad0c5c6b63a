//! Stage sequencing: nonce allocation, concurrent dispatch and confirmation barriers.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use backon::{Sleeper, TokioSleeper};
use futures::{StreamExt, stream};

use crate::{
    account::Account,
    asset::{AssetConfig, AssetDescriptor, AssetKind},
    contracts::{self, ContractArtifacts, ContractKind, LedgerRead},
    directory::{self, AddressDirectory, EXCHANGE_CORE_KEY},
    error::DeployError,
    ledger::Ledger,
    nonce::NonceAllocator,
    retry::{self, RetryPolicy},
    snapshot::{ACCOUNT_PAGE_SIZE, LedgerSnapshot},
    stage::{Operation, OperationOutcome, Stage, StageReport},
    submitter::TransactionSubmitter,
    waiter::{ConfirmationConfig, ConfirmationWaiter},
};

/// Ledger migrations are finished at most this many at a time.
pub const FINISH_MIGRATION_BATCH: usize = 10;

/// Everything a run needs, built once per invocation and shared by every component.
pub struct RunContext<L, S> {
    pub ledger: L,
    pub account: Account,
    pub chain_id: u64,
    pub directory: Arc<dyn AddressDirectory>,
    pub retry: RetryPolicy,
    pub confirmation: ConfirmationConfig,
    /// Clock used for every retry and poll interval.
    pub sleeper: S,
}

impl<L: Ledger> RunContext<L, TokioSleeper> {
    /// Build a context on the tokio clock, reading the chain id from the ledger.
    pub async fn connect(
        ledger: L,
        account: Account,
        directory: Arc<dyn AddressDirectory>,
        retry: RetryPolicy,
        confirmation: ConfirmationConfig,
    ) -> Result<Self> {
        let chain_id = retry::run(&retry, TokioSleeper, "chain id", || ledger.chain_id())
            .await
            .context("Failed to read the chain id")?;
        tracing::info!(chain_id, account = %account.address(), "Connected to ledger");

        Ok(Self {
            ledger,
            account,
            chain_id,
            directory,
            retry,
            confirmation,
            sleeper: TokioSleeper,
        })
    }
}

/// Which parts of a deployment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployPlan {
    pub deploy_exchange: bool,
    pub deploy_tokens: bool,
    pub deploy_ledgers: bool,
    /// Whitelist the administrator on the exchange core.
    pub grant_exchange_admin: bool,
    pub resume_exchange: bool,
    /// Token for ledgers whose token is neither deployed in this run nor in the directory.
    pub token_override: Option<Address>,
    /// Receives the administrative roles on ledgers and exchange core.
    pub admin: Option<Address>,
    /// Added as faucet administrator outside production.
    pub faucet_admin: Option<Address>,
    pub production: bool,
    /// Minimum deployer balance in wei.
    pub min_balance: U256,
    pub max_in_flight: Option<usize>,
}

impl DeployPlan {
    /// Every stage except resuming the exchange.
    pub fn everything() -> Self {
        Self {
            deploy_exchange: true,
            deploy_tokens: true,
            deploy_ledgers: true,
            grant_exchange_admin: true,
            ..Default::default()
        }
    }

    /// Build a plan from stage selectors. No selector means [`everything`](Self::everything).
    ///
    /// Deploying the exchange alone also grants its admin roles and resumes it.
    pub fn select(tokens: bool, exchange: bool, exchange_admin: bool, ledgers: bool) -> Self {
        if !(tokens || exchange || exchange_admin || ledgers) {
            return Self::everything();
        }
        Self {
            deploy_exchange: exchange,
            deploy_tokens: tokens,
            deploy_ledgers: ledgers,
            grant_exchange_admin: exchange || exchange_admin,
            resume_exchange: exchange && !(tokens || ledgers),
            ..Default::default()
        }
    }

    /// Plan for a run restricted to one asset.
    ///
    /// Without selectors only the asset's token, ledger and ledger grant are
    /// handled. The exchange core is loaded from the directory, never redeployed.
    pub fn select_for_asset(tokens: bool, exchange: bool, exchange_admin: bool, ledgers: bool) -> Self {
        if !(tokens || exchange || exchange_admin || ledgers) {
            return Self {
                deploy_tokens: true,
                deploy_ledgers: true,
                ..Default::default()
            };
        }
        Self::select(tokens, exchange, exchange_admin, ledgers)
    }

    fn needs_exchange(&self) -> bool {
        self.deploy_ledgers || self.grant_exchange_admin || self.resume_exchange
    }

    fn needs_admin(&self) -> bool {
        self.deploy_ledgers || self.grant_exchange_admin
    }
}

/// Outcome of a deployment run.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub exchange: Option<Address>,
    pub assets: Vec<AssetDescriptor>,
    pub stages: Vec<StageReport>,
}

/// Drives one account through a sequence of stages.
pub struct Orchestrator<L, S> {
    ctx: RunContext<L, S>,
    allocator: NonceAllocator,
}

impl<L: Ledger, S: Sleeper + Clone> Orchestrator<L, S> {
    /// Seed the nonce allocator from the ledger. Fails if the starting nonce cannot be read.
    pub async fn new(ctx: RunContext<L, S>) -> Result<Self, DeployError> {
        let address = ctx.account.address();
        let allocator = NonceAllocator::initialize(&ctx.ledger, address)
            .await
            .map_err(|source| DeployError::NonceInit { address, source })?;
        Ok(Self { ctx, allocator })
    }

    pub fn context(&self) -> &RunContext<L, S> {
        &self.ctx
    }

    pub fn allocator(&self) -> &NonceAllocator {
        &self.allocator
    }

    /// Abort unless the deployer holds at least `required` wei.
    pub async fn ensure_balance(&self, required: U256) -> Result<U256> {
        let ctx = &self.ctx;
        let address = ctx.account.address();
        let balance = retry::run(&ctx.retry, ctx.sleeper.clone(), "balance", || {
            ctx.ledger.balance(address)
        })
        .await
        .context("Failed to read the deployer balance")?;

        tracing::info!(%address, %balance, %required, "Deployer balance");
        if balance < required {
            return Err(DeployError::InsufficientBalance {
                address,
                balance,
                required,
            }
            .into());
        }
        Ok(balance)
    }

    /// Allocate a nonce per operation, dispatch them concurrently, then wait until
    /// the ledger's next nonce reaches `last allocated + 1`.
    pub async fn run_stage(&mut self, stage: Stage) -> Result<StageReport, DeployError> {
        let Stage {
            name,
            operations,
            max_in_flight,
        } = stage;
        let first_nonce = self.allocator.peek();

        if operations.is_empty() {
            tracing::info!(stage = %name, "Stage has no operations, skipping");
            return Ok(StageReport {
                stage: name,
                first_nonce,
                target: first_nonce,
                observed_nonce: first_nonce,
                outcomes: Vec::new(),
            });
        }

        // All nonces are taken before the first operation is polled.
        let assigned: Vec<(u64, Operation)> = operations
            .into_iter()
            .map(|operation| (self.allocator.allocate(), operation))
            .collect();
        let target = self.allocator.peek();

        tracing::info!(
            stage = %name,
            first_nonce,
            target,
            operations = assigned.len(),
            "Dispatching stage"
        );
        for (nonce, operation) in &assigned {
            tracing::debug!(stage = %name, nonce, operation = %operation.label, "Nonce assigned");
        }

        let ctx = &self.ctx;
        let submitter = TransactionSubmitter::new(ctx);
        let submitter = &submitter;
        let limit = max_in_flight.unwrap_or(assigned.len()).max(1);

        let mut in_flight = stream::iter(assigned.iter())
            .map(move |(nonce, operation)| async move {
                (*nonce, operation, submitter.execute(operation, *nonce).await)
            })
            .buffer_unordered(limit);

        let mut outcomes = Vec::with_capacity(assigned.len());
        let mut failure = None;
        while let Some((nonce, operation, result)) = in_flight.next().await {
            match result {
                Ok(receipt) => outcomes.push(OperationOutcome {
                    label: operation.label.clone(),
                    nonce,
                    receipt,
                }),
                Err(err) => {
                    tracing::error!(
                        stage = %name,
                        nonce,
                        operation = %operation.label,
                        error = %err,
                        "Operation failed"
                    );
                    failure = Some((nonce, operation.label.clone(), err));
                    break;
                }
            }
        }
        drop(in_flight);

        if let Some((nonce, operation, source)) = failure {
            let unresolved = assigned.len() - outcomes.len() - 1;
            if unresolved > 0 {
                tracing::warn!(
                    stage = %name,
                    unresolved,
                    "Stopped awaiting the stage's other operations, their transactions may still be mined"
                );
            }
            return Err(DeployError::Stage {
                stage: name,
                operation,
                nonce,
                source,
            });
        }
        outcomes.sort_by_key(|outcome| outcome.nonce);

        let address = ctx.account.address();
        let waiter = ConfirmationWaiter::new(ctx.confirmation.nonce_poll(), ctx.sleeper.clone());
        let observed_nonce = retry::run(&ctx.retry, ctx.sleeper.clone(), "confirmation barrier", || {
            waiter.wait_for(&ctx.ledger, address, target)
        })
        .await
        .map_err(|source| DeployError::Stage {
            stage: name.clone(),
            operation: "confirmation barrier".to_string(),
            nonce: target - 1,
            source,
        })?;
        tracing::info!(stage = %name, target, observed = observed_nonce, "Stage confirmed");

        let current = retry::run(&ctx.retry, ctx.sleeper.clone(), "nonce resync", || {
            ctx.ledger.next_nonce(address)
        })
        .await
        .map_err(|source| DeployError::Stage {
            stage: name.clone(),
            operation: "nonce resync".to_string(),
            nonce: target - 1,
            source,
        })?;
        self.allocator.rebase(current);

        Ok(StageReport {
            stage: name,
            first_nonce,
            target,
            observed_nonce,
            outcomes,
        })
    }

    fn lookup(&self, key: &str, asset: &str, contract: &'static str) -> Result<Address> {
        self.ctx.directory.get(key)?.ok_or_else(|| {
            DeployError::UnresolvedDependency {
                asset: asset.to_string(),
                contract,
            }
            .into()
        })
    }

    /// Tokens living elsewhere need no transaction, only their address recorded.
    fn record_external_tokens(&self, assets: &[AssetDescriptor]) -> Result<()> {
        for asset in assets.iter().filter(|asset| asset.persist) {
            let AssetKind::External { address, .. } = &asset.kind else {
                continue;
            };
            let key = directory::token_key(&asset.name);
            if self.ctx.directory.get(&key)? != Some(*address) {
                self.ctx.directory.set(&key, *address)?;
                tracing::info!(asset = %asset.name, %address, "Recorded external token address");
            }
        }
        Ok(())
    }

    /// Read-only call under the retry policy.
    async fn read(&self, to: Address, call: LedgerRead) -> Result<Bytes> {
        let ctx = &self.ctx;
        let input = call.encode();
        Ok(retry::run(&ctx.retry, ctx.sleeper.clone(), "read call", || {
            ctx.ledger.call(to, input.clone())
        })
        .await
        .with_context(|| format!("{call:?} on {to} failed"))?)
    }

    fn ledger_addresses(&self, assets: &[AssetConfig]) -> Result<Vec<(String, Address)>> {
        assets
            .iter()
            .map(|asset| {
                let key = directory::ledger_key(&asset.name);
                Ok((asset.name.clone(), self.lookup(&key, &asset.name, "ledger")?))
            })
            .collect()
    }

    /// Run the canonical deployment: exchange core, tokens, faucet setup,
    /// ledgers, administrative grants and, optionally, resume.
    pub async fn deploy(
        &mut self,
        plan: &DeployPlan,
        artifacts: &ContractArtifacts,
        assets: Vec<AssetConfig>,
    ) -> Result<DeployReport> {
        let admin = match (plan.needs_admin(), plan.admin) {
            (true, None) => return Err(DeployError::MissingConfig("admin_address").into()),
            (_, admin) => admin,
        };
        self.ensure_balance(plan.min_balance).await?;

        let mut report = DeployReport {
            assets: assets.into_iter().map(AssetDescriptor::from).collect(),
            ..Default::default()
        };

        // Exchange core: deploy it, or load the deployed one before anything is sent.
        let exchange = if plan.deploy_exchange {
            let label = "deploy exchange core";
            let init_code = artifacts.init_code(ContractKind::ExchangeCore, &[])?;
            let mut stage = Stage::new("exchange-core");
            stage.push(
                Operation::deploy(label, ContractKind::ExchangeCore, init_code)
                    .recorded_as(EXCHANGE_CORE_KEY),
            );
            let stage_report = self.run_stage(stage).await?;
            let address = stage_report
                .deployed(label)
                .context("Exchange core receipt carries no contract address")?;
            report.stages.push(stage_report);
            Some(address)
        } else if plan.needs_exchange() {
            let address = self.lookup(EXCHANGE_CORE_KEY, "exchange", "exchange core")?;
            tracing::info!(%address, "Loaded exchange core address");
            Some(address)
        } else {
            None
        };
        report.exchange = exchange;

        if plan.deploy_tokens || plan.deploy_ledgers {
            self.record_external_tokens(&report.assets)?;
        }

        if plan.deploy_tokens {
            let mut stage = Stage::new("tokens");
            stage.max_in_flight = plan.max_in_flight;
            let mut labels = Vec::new();
            for (index, asset) in report.assets.iter().enumerate() {
                let Some((kind, init_code)) = asset.kind.token_deployment(&asset.name, artifacts)?
                else {
                    continue;
                };
                let label = format!("deploy token {}", asset.name);
                let mut operation = Operation::deploy(&label, kind, init_code);
                if asset.persist {
                    operation = operation.recorded_as(directory::token_key(&asset.name));
                }
                stage.push(operation);
                labels.push((index, label));
            }

            let stage_report = self.run_stage(stage).await?;
            for (index, label) in labels {
                report.assets[index].token = stage_report.deployed(&label);
            }
            report.stages.push(stage_report);

            let faucets = faucet_setup(plan, &report.assets);
            if !faucets.is_empty() {
                report.stages.push(self.run_stage(faucets).await?);
            }
        }

        if plan.deploy_ledgers {
            let exchange = exchange.context("Exchange core address missing for ledgers")?;

            // Resolve every token before any nonce is allocated for the stage.
            for asset in report.assets.iter_mut() {
                if asset.token.is_some() {
                    continue;
                }
                let token = match plan.token_override {
                    Some(token) => token,
                    None => self.lookup(&directory::token_key(&asset.name), &asset.name, "token")?,
                };
                tracing::info!(asset = %asset.name, %token, "Resolved token address");
                asset.token = Some(token);
            }

            let mut stage = Stage::new("ledgers");
            stage.max_in_flight = plan.max_in_flight;
            let init_codes = report
                .assets
                .iter()
                .map(|asset| {
                    let token = asset.token.context("token resolved above")?;
                    let args = contracts::ledger_args(
                        &asset.name,
                        token,
                        exchange,
                        asset.kind.is_native_wrapper(),
                    );
                    artifacts.init_code(ContractKind::Ledger, &args)
                })
                .collect::<Result<Vec<_>>>()?;

            for (asset, init_code) in report.assets.iter().zip(init_codes) {
                let mut operation = Operation::deploy(
                    format!("deploy ledger {}", asset.name),
                    ContractKind::Ledger,
                    init_code,
                );
                if asset.persist {
                    operation = operation.recorded_as(directory::ledger_key(&asset.name));
                }
                stage.push(operation);
            }

            let stage_report = self.run_stage(stage).await?;
            for asset in report.assets.iter_mut() {
                asset.ledger = stage_report.deployed(&format!("deploy ledger {}", asset.name));
            }
            report.stages.push(stage_report);
        }

        if let Some(admin) = admin {
            let mut stage = Stage::new("admin-grants");
            if plan.deploy_ledgers {
                for asset in &report.assets {
                    if let Some(ledger) = asset.ledger {
                        stage.push(Operation::call(
                            format!("grant ledger admin {}", asset.name),
                            ledger,
                            contracts::ledger_add_whitelist_admin(admin),
                        ));
                    }
                }
            }
            if let (true, Some(exchange)) = (plan.grant_exchange_admin, exchange) {
                stage.push(Operation::call(
                    "whitelist admin on exchange core",
                    exchange,
                    contracts::add_whitelisted(admin),
                ));
                stage.push(Operation::call(
                    "grant exchange core admin",
                    exchange,
                    contracts::exchange_add_whitelist_admin(admin),
                ));
            }
            if !stage.is_empty() {
                report.stages.push(self.run_stage(stage).await?);
            }
        }

        if let (true, Some(exchange)) = (plan.resume_exchange, exchange) {
            report.stages.push(self.run_stage(resume_stage(exchange)).await?);
        }

        tracing::info!(
            stages = report.stages.len(),
            next_nonce = self.allocator.peek(),
            "Deployment finished"
        );
        Ok(report)
    }

    /// Unpause the exchange core found in the directory.
    pub async fn resume_exchange(&mut self) -> Result<StageReport> {
        let exchange = self.lookup(EXCHANGE_CORE_KEY, "exchange", "exchange core")?;
        Ok(self.run_stage(resume_stage(exchange)).await?)
    }

    /// Pause every listed ledger that is not paused yet.
    pub async fn pause_ledgers(&mut self, assets: &[AssetConfig]) -> Result<StageReport> {
        let ledgers = self.ledger_addresses(assets)?;

        let mut stage = Stage::new("pause-ledgers");
        for (name, ledger) in ledgers {
            let output = self
                .read(ledger, LedgerRead::Paused)
                .await
                .with_context(|| format!("Failed to read the pause state of ledger {}", name))?;

            if contracts::decode_paused(&output)? {
                tracing::info!(asset = %name, %ledger, "Ledger already paused");
                continue;
            }
            stage.push(Operation::call(
                format!("pause ledger {}", name),
                ledger,
                contracts::ledger_pause(),
            ));
        }

        Ok(self.run_stage(stage).await?)
    }

    /// Read the supply and every holder balance of one ledger.
    ///
    /// Holders are listed a page of [`ACCOUNT_PAGE_SIZE`] at a time. Zero
    /// addresses padding a page are skipped.
    pub async fn snapshot_ledger(&self, ledger: Address) -> Result<LedgerSnapshot> {
        let total_supply = contracts::decode_uint(&self.read(ledger, LedgerRead::TotalSupply).await?)?;
        let account_total = contracts::decode_uint(&self.read(ledger, LedgerRead::AccountTotal).await?)?;
        let account_total = usize::try_from(account_total)
            .with_context(|| format!("Ledger {ledger} reports {account_total} accounts"))?;

        let mut snapshot = LedgerSnapshot::new(ledger, total_supply);
        for offset in (0..account_total).step_by(ACCOUNT_PAGE_SIZE) {
            let page = self
                .read(ledger, LedgerRead::AccountList(U256::from(offset)))
                .await?;
            for account in contracts::decode_account_list(&page)? {
                if account.is_zero() {
                    continue;
                }
                let balance = self.read(ledger, LedgerRead::BalanceOf(account)).await?;
                snapshot.push(account, contracts::decode_uint(&balance)?);
            }
        }

        if snapshot.total_balance() != total_supply {
            tracing::warn!(
                %ledger,
                %total_supply,
                balances = %snapshot.total_balance(),
                "Holder balances do not add up to the total supply"
            );
        }
        Ok(snapshot)
    }

    /// Snapshot every listed ledger into `<data_dir>/<asset>.dat`.
    ///
    /// Run it after [`pause_ledgers`](Self::pause_ledgers) so balances cannot move.
    pub async fn export_ledgers(
        &self,
        assets: &[AssetConfig],
        data_dir: &Path,
    ) -> Result<Vec<(String, PathBuf)>> {
        let mut written = Vec::new();
        for (name, ledger) in self.ledger_addresses(assets)? {
            tracing::info!(asset = %name, %ledger, "Reading ledger holders");
            let snapshot = self
                .snapshot_ledger(ledger)
                .await
                .with_context(|| format!("Failed to snapshot ledger {}", name))?;
            written.push((name.clone(), snapshot.write(data_dir, &name)?));
        }
        Ok(written)
    }

    /// Call `finishMigration()` on every listed ledger.
    pub async fn finish_migration(&mut self, assets: &[AssetConfig]) -> Result<StageReport> {
        let mut stage = Stage::new("finish-migration").with_max_in_flight(FINISH_MIGRATION_BATCH);
        for (name, ledger) in self.ledger_addresses(assets)? {
            stage.push(Operation::call(
                format!("finish migration {}", name),
                ledger,
                contracts::ledger_finish_migration(),
            ));
        }
        Ok(self.run_stage(stage).await?)
    }

    /// Mint `amount` of every mintable asset to each recipient.
    pub async fn mint(
        &mut self,
        assets: &[AssetConfig],
        recipients: &[Address],
        amount: U256,
    ) -> Result<StageReport> {
        let mut stage = Stage::new("mint");
        for asset in assets.iter().filter(|asset| asset.kind.is_mintable()) {
            let token = self.lookup(&directory::token_key(&asset.name), &asset.name, "token")?;
            for recipient in recipients {
                let input = match asset.kind {
                    AssetKind::FaucetToken => contracts::faucet_mint(*recipient, amount),
                    _ => contracts::mintable_mint(*recipient, amount),
                };
                stage.push(Operation::call(
                    format!("mint {} to {}", asset.name, recipient),
                    token,
                    input,
                ));
            }
        }
        Ok(self.run_stage(stage).await?)
    }
}

/// Unpause deployed faucet tokens and, outside production, add the faucet admin.
fn faucet_setup(plan: &DeployPlan, assets: &[AssetDescriptor]) -> Stage {
    let mut stage = Stage::new("faucet-setup");
    for asset in assets.iter().filter(|asset| asset.kind.is_faucet()) {
        let Some(token) = asset.token else { continue };
        stage.push(Operation::call(
            format!("unpause faucet {}", asset.name),
            token,
            contracts::faucet_unpause(),
        ));
        match (plan.production, plan.faucet_admin) {
            (false, Some(faucet_admin)) => stage.push(Operation::call(
                format!("add faucet admin {}", asset.name),
                token,
                contracts::faucet_add_admin(faucet_admin),
            )),
            (false, None) => {
                tracing::warn!(asset = %asset.name, "No faucet admin configured, skipping")
            }
            (true, _) => {}
        }
    }
    stage
}

fn resume_stage(exchange: Address) -> Stage {
    let mut stage = Stage::new("resume");
    stage.push(Operation::call(
        "resume exchange core",
        exchange,
        contracts::exchange_resume(),
    ));
    stage
}
