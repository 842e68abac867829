//! `policyflow`: valida políticas y ejecuta acciones grabadas contra una
//! instancia (en vivo o en dry-run).
//!
//! Stores en memoria salvo que `DATABASE_URL` esté definido.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};
use policyflow::app::{self, Stores};
use policyflow::engine::{replay, ExecutionReport, PolicyMode};
use policyflow::{AppConfig, AppError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "policyflow", about = "Block-based policy workflow engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a policy document and print the full report
    Validate {
        /// Policy definition (JSON)
        policy: PathBuf,
    },

    /// Publish a policy and run recorded actions against it
    Run {
        /// Policy definition (JSON)
        policy: PathBuf,
        /// Recorded actions (JSON array)
        actions: PathBuf,
        /// Run in a dry-run sandbox with savepoints
        #[arg(long)]
        dry_run: bool,
        /// Automatic checkpoint every N inputs (dry-run only, 0 = off)
        #[arg(long, default_value_t = 0, env = "POLICYFLOW_CHECKPOINT_EVERY")]
        checkpoint_every: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry().with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                                  .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
                                  .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate { policy } => validate(policy),
        Commands::Run { policy,
                        actions,
                        dry_run,
                        checkpoint_every, } => run(policy, actions, dry_run, checkpoint_every).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn validate(policy: PathBuf) -> Result<ExitCode, AppError> {
    let definition = app::load_policy(&policy)?;
    let report = app::validate(&definition)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_valid() {
        info!("{}: valid", definition.policy_id);
        Ok(ExitCode::SUCCESS)
    } else {
        info!("{}: {} error(s)", definition.policy_id, report.error_count());
        Ok(ExitCode::from(4))
    }
}

async fn run(policy: PathBuf, actions: PathBuf, dry_run: bool, checkpoint_every: usize) -> Result<ExitCode, AppError> {
    let cfg = AppConfig::from_env()?;
    if checkpoint_every > 0 && !dry_run {
        return Err(AppError::Config("--checkpoint-every requires --dry-run".into()));
    }
    let definition = app::load_policy(&policy)?;
    let actions = app::load_actions(&actions)?;
    let stores = Stores::from_config(&cfg)?;
    let mode = if dry_run { PolicyMode::DryRun } else { PolicyMode::Live };
    let ctx = app::publish(definition, mode, &cfg)?;

    let reports = if dry_run {
        let session = app::dry_run(ctx, &stores, checkpoint_every)?;
        session.seed_from_live().await?;
        let reports = app::run_in_session(&session, &actions).await?;
        for sp in session.savepoints().savepoints(session.store_scope()).await? {
            info!("savepoint {} (seq {})", sp.savepoint_id, sp.seq);
        }
        reports
    } else {
        let runtime = app::runtime(ctx, &stores);
        replay(&runtime, &actions).await?
    };
    print_reports(&reports)?;
    let failed = reports.iter().filter(|r| !r.is_clean()).count();
    info!("{} action(s), {} with errors", reports.len(), failed);
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn print_reports(reports: &[ExecutionReport]) -> Result<(), AppError> {
    for report in reports {
        println!("{}", serde_json::to_string(report)?);
    }
    Ok(())
}
