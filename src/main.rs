//! Operator CLI over a JSON state snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use sponsor_rewards::downline::{collect_downline, leg_split};
use sponsor_rewards::ledger::ledger_digest;
use sponsor_rewards::model::{Account, TxKind, TxStatus};
use sponsor_rewards::qualification::LevelQualifier;
use sponsor_rewards::reconcile::{ledger_snapshot, reconcile};
use sponsor_rewards::referral::record_deposit;
use sponsor_rewards::single_leg::record_withdrawal;
use sponsor_rewards::store::AccountStore;
use sponsor_rewards::{CommissionConfig, JobKind, JobRunner, MemoryStore, Transaction};

/// Sponsor-tree commission engine
#[derive(Parser)]
#[command(name = "sponsor-rewards")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// State snapshot (JSON); created on first write
    #[arg(short, long, global = true, default_value = "state.json", env = "SPONSOR_REWARDS_STATE")]
    state: PathBuf,

    /// Commission config (JSON); built-in defaults when absent
    #[arg(short, long, global = true, env = "SPONSOR_REWARDS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one batch job, or every job in schedule order
    Run {
        job: JobArg,

        /// Evaluation time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Register an account under a sponsor
    Register {
        id: String,

        #[arg(long)]
        sponsor: Option<String>,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Record a completed deposit and distribute referral income
    Deposit {
        #[arg(long)]
        account: String,

        /// Amount in minor units
        #[arg(long)]
        amount: u64,

        #[arg(long)]
        tx: String,

        #[arg(long)]
        plan: Option<String>,

        /// Record as a reinvestment
        #[arg(long)]
        reinvest: bool,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Record a completed withdrawal and distribute its fee
    Withdraw {
        #[arg(long)]
        account: String,

        /// Amount in minor units
        #[arg(long)]
        amount: u64,

        #[arg(long)]
        tx: String,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show an account's downline and leg split
    Downline {
        account: String,

        #[arg(long)]
        depth: Option<u32>,
    },

    /// Show an account's level qualification
    UnlockedDepth { account: String },

    /// Compare income aggregates with the ledger
    Reconcile {
        /// Rewrite drifted aggregates
        #[arg(long)]
        repair: bool,
    },

    /// Print the ledger Merkle root
    Digest,
}

#[derive(Clone, Copy, ValueEnum)]
enum JobArg {
    Roi,
    Rank,
    Matching,
    Reward,
    All,
}

impl JobArg {
    fn jobs(self) -> Vec<JobKind> {
        match self {
            JobArg::Roi => vec![JobKind::Roi],
            JobArg::Rank => vec![JobKind::Rank],
            JobArg::Matching => vec![JobKind::Matching],
            JobArg::Reward => vec![JobKind::Reward],
            JobArg::All => JobKind::ALL.to_vec(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let mut store = load_state(&cli.state)?;

    match cli.command {
        Commands::Run { job, at } => {
            let now = at.unwrap_or_else(Utc::now);
            let runner = JobRunner::new();
            let mut outcomes = Vec::new();
            for kind in job.jobs() {
                outcomes.push(runner.run_job(kind, &mut store, &config, now));
            }
            save_state(&cli.state, &store)?;
            print_json(&outcomes)
        }
        Commands::Register { id, sponsor, at } => {
            let account = Account::new(id, sponsor, at.unwrap_or_else(Utc::now));
            store
                .insert_account(account.clone())
                .with_context(|| format!("registering {}", account.id))?;
            save_state(&cli.state, &store)?;
            print_json(&account)
        }
        Commands::Deposit {
            account,
            amount,
            tx,
            plan,
            reinvest,
            at,
        } => {
            let tx = Transaction {
                id: tx,
                account,
                kind: if reinvest { TxKind::Reinvestment } else { TxKind::Deposit },
                amount,
                plan,
                status: TxStatus::Completed,
                created_at: at.unwrap_or_else(Utc::now),
            };
            let outcome = record_deposit(&mut store, &config, tx)?;
            save_state(&cli.state, &store)?;
            print_json(&outcome)
        }
        Commands::Withdraw { account, amount, tx, at } => {
            let tx = Transaction {
                id: tx,
                account,
                kind: TxKind::Withdrawal,
                amount,
                plan: None,
                status: TxStatus::Completed,
                created_at: at.unwrap_or_else(Utc::now),
            };
            let outcome = record_withdrawal(&mut store, &config, tx)?;
            save_state(&cli.state, &store)?;
            print_json(&outcome)
        }
        Commands::Downline { account, depth } => {
            let account = account.into();
            let members = collect_downline(&store, &account, depth)?;
            let split = leg_split(&store, &account)?;
            print_json(&serde_json::json!({ "members": members, "legs": split }))
        }
        Commands::UnlockedDepth { account } => {
            let qualification =
                LevelQualifier::new(&config.qualification).evaluate(&store, &account.into())?;
            print_json(&qualification)
        }
        Commands::Reconcile { repair } => {
            let report = reconcile(&mut store, &config, repair)?;
            if repair {
                save_state(&cli.state, &store)?;
            }
            print_json(&report)
        }
        Commands::Digest => {
            let records = ledger_snapshot(&store)?;
            println!("{}", hex::encode(ledger_digest(&records)));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CommissionConfig> {
    let Some(path) = path else {
        return Ok(CommissionConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(CommissionConfig::from_json(&raw)?)
}

fn load_state(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        return Ok(MemoryStore::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading state {}", path.display()))?;
    if raw.trim().is_empty() {
        bail!("state file {} is empty", path.display());
    }
    serde_json::from_str(&raw).with_context(|| format!("parsing state {}", path.display()))
}

fn save_state(path: &Path, store: &MemoryStore) -> Result<()> {
    let raw = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    info!(path = %path.display(), "state saved");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
