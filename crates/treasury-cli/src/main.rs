mod config;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use treasury_core::{
    Amount, BeneficiaryKind, BeneficiaryUpdate, Category, DecisionFilter, DecisionOutcome,
    DecisionRequest, DecisionType, DistributionRequest, Metadata, NewBeneficiary, PendingStatus,
    Priority, SystemClock, TreasuryEngine,
};

#[derive(Debug, Parser)]
#[command(name = "treasuryd", version, about = "Treasury ledger and distribution scheduler")]
struct Cli {
    /// TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true, env = "TREASURY_CONFIG")]
    config: Option<PathBuf>,
    /// Directory for file-backed storage. Overrides the config file's storage section.
    #[arg(long, global = true, env = "TREASURY_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Balance, beneficiary counts, queue sizes, daily cap, and integrity status.
    Status,
    /// Record a deposit into the fund.
    Deposit {
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        source: String,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Withdraw directly from the fund (reserve rules apply).
    Withdraw {
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        approver: String,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Register a new beneficiary.
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "individual")]
        kind: BeneficiaryKind,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        #[arg(long, default_value = "general")]
        category: Category,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Update fields of an existing beneficiary.
    Update {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        kind: Option<BeneficiaryKind>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        category: Option<Category>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Show one beneficiary, or list all of them.
    Beneficiaries {
        #[arg(long)]
        id: Option<String>,
    },
    /// Recommended payout for one beneficiary.
    Allocate {
        #[arg(long)]
        beneficiary: String,
    },
    /// Advisory priority-ordered batch proposal.
    Propose {
        /// Restrict to these beneficiaries (repeatable). Defaults to everyone.
        #[arg(long = "beneficiary")]
        beneficiaries: Vec<String>,
    },
    /// Request a distribution. Large amounts are deferred.
    Distribute {
        #[arg(long)]
        beneficiary: String,
        #[arg(long)]
        amount: Amount,
        #[arg(long)]
        approver: String,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Release due pending distributions once.
    Sweep {
        #[arg(long, default_value = "treasuryd")]
        approver: String,
    },
    /// Show one pending distribution, or list the queue.
    Pending {
        #[arg(long)]
        id: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Completed distributions in a time window.
    Completed {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Record an explicit governance decision.
    Decide {
        /// Decision tag, e.g. CHARTER_AMENDMENT.
        #[arg(long = "type")]
        decision_type: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        proposer: String,
        #[arg(long, value_enum)]
        outcome: OutcomeArg,
        #[arg(long = "approver")]
        approvers: Vec<String>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Query governance decisions.
    Decisions {
        #[arg(long = "type")]
        decision_type: Option<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Re-verify the governance chain and ledger entry hashes.
    Verify,
    /// Ledger entries with their hash checks.
    Audit {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Sweep pending distributions periodically until interrupted.
    Run {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        #[arg(long, default_value = "treasuryd")]
        approver: String,
    },
}

#[derive(Debug, Args)]
struct MetaArgs {
    /// Metadata entry as key=value (repeatable).
    #[arg(long = "meta", value_parser = parse_key_value)]
    entries: Vec<(String, String)>,
}

impl MetaArgs {
    fn into_metadata(self) -> Metadata {
        self.entries.into_iter().collect()
    }
}

#[derive(Debug, Args)]
struct WindowArgs {
    /// Inclusive lower bound (RFC 3339).
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339).
    #[arg(long)]
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Pending,
    Executed,
    Failed,
}

impl From<StatusArg> for PendingStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => PendingStatus::Pending,
            StatusArg::Executed => PendingStatus::Executed,
            StatusArg::Failed => PendingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Approved,
    Rejected,
    Executed,
    Deferred,
    Failed,
    Recorded,
}

impl From<OutcomeArg> for DecisionOutcome {
    fn from(value: OutcomeArg) -> Self {
        match value {
            OutcomeArg::Approved => DecisionOutcome::Approved,
            OutcomeArg::Rejected => DecisionOutcome::Rejected,
            OutcomeArg::Executed => DecisionOutcome::Executed,
            OutcomeArg::Deferred => DecisionOutcome::Deferred,
            OutcomeArg::Failed => DecisionOutcome::Failed,
            OutcomeArg::Recorded => DecisionOutcome::Recorded,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute(engine: &TreasuryEngine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => print_json(&engine.get_system_status().await),
        Command::Deposit {
            amount,
            source,
            meta,
        } => print_json(
            &engine
                .deposit(amount, &source, meta.into_metadata())
                .await?,
        ),
        Command::Withdraw {
            amount,
            destination,
            approver,
            meta,
        } => print_json(
            &engine
                .withdraw(amount, &destination, &approver, meta.into_metadata())
                .await?,
        ),
        Command::Register {
            id,
            name,
            kind,
            priority,
            category,
            meta,
        } => {
            let mut request = NewBeneficiary::new(id, name)
                .with_kind(kind)
                .with_classification(priority, category);
            request.metadata = meta.into_metadata();
            print_json(&engine.register_beneficiary(request).await?)
        }
        Command::Update {
            id,
            name,
            kind,
            priority,
            category,
            meta,
        } => {
            let metadata = meta.into_metadata();
            let update = BeneficiaryUpdate {
                name,
                kind,
                priority,
                category,
                metadata: (!metadata.is_empty()).then_some(metadata),
            };
            if update.is_empty() {
                anyhow::bail!("nothing to update for beneficiary '{id}'");
            }
            print_json(&engine.update_beneficiary(&id, update).await?)
        }
        Command::Beneficiaries { id: Some(id) } => {
            let beneficiary = engine
                .get_beneficiary(&id)
                .await
                .ok_or_else(|| anyhow::anyhow!("beneficiary '{id}' not found"))?;
            print_json(&beneficiary)
        }
        Command::Beneficiaries { id: None } => print_json(&engine.list_beneficiaries().await),
        Command::Allocate { beneficiary } => {
            print_json(&engine.calculate_allocation(&beneficiary).await?)
        }
        Command::Propose { beneficiaries } => {
            let filter = (!beneficiaries.is_empty()).then_some(beneficiaries.as_slice());
            print_json(&engine.propose_distribution(filter).await?)
        }
        Command::Distribute {
            beneficiary,
            amount,
            approver,
            meta,
        } => {
            let mut request = DistributionRequest::new(beneficiary, amount, approver);
            request.metadata = meta.into_metadata();
            print_json(&engine.execute_distribution(request).await?)
        }
        Command::Sweep { approver } => print_json(&engine.process_pending(&approver).await?),
        Command::Pending { id: Some(id), .. } => {
            print_json(&engine.get_pending_distribution(&id).await?)
        }
        Command::Pending { id: None, status } => print_json(
            &engine
                .list_pending_distributions(status.map(PendingStatus::from))
                .await,
        ),
        Command::Completed { window } => print_json(
            &engine
                .list_completed_distributions(window.from, window.to)
                .await,
        ),
        Command::Decide {
            decision_type,
            description,
            proposer,
            outcome,
            approvers,
            meta,
        } => {
            let mut request = DecisionRequest::new(
                DecisionType::from(decision_type),
                description,
                proposer,
                outcome.into(),
            )
            .with_metadata_map(&meta.into_metadata());
            request.approvers = approvers;
            print_json(&engine.log_governance_decision(request).await?)
        }
        Command::Decisions {
            decision_type,
            window,
        } => {
            let filter = DecisionFilter {
                decision_type: decision_type.map(DecisionType::from),
                from: window.from,
                to: window.to,
            };
            print_json(&engine.query_governance_decisions(&filter).await)
        }
        Command::Verify => {
            let governance = engine.verify_governance_integrity().await;
            let ledger = engine.verify_ledger().await;
            print_json(&serde_json::json!({
                "intact": governance.is_intact() && ledger.is_intact(),
                "governance": governance,
                "ledger": ledger,
            }))
        }
        Command::Audit { window } => print_json(&engine.audit_trail(window.from, window.to).await),
        Command::Run {
            interval_secs,
            approver,
        } => run(engine, interval_secs, &approver).await,
    }
}

/// Drive `process_pending` on a fixed interval until Ctrl-C.
async fn run(engine: &TreasuryEngine, interval_secs: u64, approver: &str) -> anyhow::Result<()> {
    anyhow::ensure!(interval_secs > 0, "--interval-secs must be positive");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs, approver, "Sweep loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => match engine.process_pending(approver).await {
                Ok(report) if !report.is_empty() => print_json(&report)?,
                Ok(_) => {}
                Err(err) => error!(error = %err, code = err.code(), "Sweep failed"),
            },
            signal = &mut shutdown => {
                if let Err(err) = signal {
                    warn!(error = %err, "Failed to listen for shutdown signal");
                }
                info!("Sweep loop stopped");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("treasuryd=info,treasury_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref(), cli.data_dir)?;
    if config.storage.label() == "memory" && !matches!(cli.command, Command::Run { .. }) {
        warn!("Using in-memory storage: state is discarded when this command exits");
    }

    let engine = TreasuryEngine::bootstrap(config, Arc::new(SystemClock))?;
    execute(&engine, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_metadata_pairs() {
        assert_eq!(
            parse_key_value("region = north").unwrap(),
            ("region".to_string(), "north".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn parses_distribution_command() {
        let cli = Cli::try_parse_from([
            "treasuryd",
            "--data-dir",
            "/tmp/treasury",
            "distribute",
            "--beneficiary",
            "family-7",
            "--amount",
            "1500.25",
            "--approver",
            "council",
            "--meta",
            "reason=roof",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/treasury")));
        match cli.command {
            Command::Distribute { amount, meta, .. } => {
                assert_eq!(amount, Amount::from_minor(150_025));
                assert_eq!(meta.entries, vec![("reason".to_string(), "roof".to_string())]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_shot_commands_share_file_storage() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config::load(None, Some(dir.path().to_path_buf())).unwrap();

        let engine = TreasuryEngine::bootstrap(config.clone(), Arc::new(SystemClock)).unwrap();
        execute(
            &engine,
            Command::Deposit {
                amount: Amount::from_units(500),
                source: "donor".to_string(),
                meta: MetaArgs { entries: vec![] },
            },
        )
        .await
        .unwrap();
        drop(engine);

        let reopened = TreasuryEngine::bootstrap(config, Arc::new(SystemClock)).unwrap();
        assert_eq!(reopened.balance().await.total, Amount::from_units(500));
    }
}
