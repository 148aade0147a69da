//! Process entry point: parses a small subcommand set, wires the
//! library's collaborators together from a config file, and drives the
//! poll loop.
//!
//! Grounded on the teacher's top-level `main.rs` (subcommand dispatch,
//! `#[tokio::main] async fn main()`) and `commands/up.rs`
//! (`tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env())`
//! for logging init). This crate's `Cargo.toml` already declares clap's
//! `derive` feature, so subcommands are spelled with `#[derive(Parser)]`
//! rather than the teacher's builder-style `clap::Command`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use agenc_runtime::audit::AuditTrail;
use agenc_runtime::candidates::{ExecutionResult, Executor};
use agenc_runtime::config::RuntimeConfig;
use agenc_runtime::error::ChainClientError;
use agenc_runtime::metrics::InMemoryMetrics;
use agenc_runtime::policy::PolicyEngine;
use agenc_runtime::runtime::{ChainClient, RuntimeGlue};
use agenc_runtime::types::{Task, U256, Verdict, VerifierOutcome};
use agenc_runtime::verifier_lane::{Verifier, VerifierLane};

#[derive(Parser)]
#[command(name = "agenc-runtime", version, about = "Task-execution and verification pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate a config file, printing the result.
    Validate {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
    /// Run the poll loop.
    ///
    /// The chain client is an external collaborator described only at
    /// the interface boundary (§6); none ships with this crate. This
    /// subcommand wires a client that always reports zero pending
    /// tasks, so the rest of the pipeline (store, policy, audit,
    /// verifier lane) can be exercised end to end without pretending to
    /// integrate with a real chain.
    Run {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
        /// Stop after this many poll cycles; omit to run until Ctrl-C.
        #[arg(long)]
        cycles: Option<u32>,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { config } => validate(&config),
        Command::Run { config, cycles, interval_secs } => run(&config, cycles, interval_secs).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn validate(path: &PathBuf) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(path)?;
    match config.validate() {
        Ok(()) => {
            println!("{} is valid", path.display());
            Ok(())
        }
        Err(err) => {
            eprintln!("{} is invalid: {err}", path.display());
            std::process::exit(1);
        }
    }
}

async fn run(path: &PathBuf, cycles: Option<u32>, interval_secs: u64) -> anyhow::Result<()> {
    let config = RuntimeConfig::from_file(path)?;
    config.validate()?;
    init_tracing(config.logging.json);

    let store = config.store.build().await?;
    let policy = Arc::new(PolicyEngine::new(config.policy.clone()));
    let audit = Arc::new(AuditTrail::new());
    let metrics = Arc::new(InMemoryMetrics::new());

    let verifier_lane = Arc::new(VerifierLane::new(
        config.verifier.clone(),
        Arc::new(UnintegratedExecutor),
        Arc::new(UnintegratedVerifier),
        metrics.clone(),
    ));

    let glue = RuntimeGlue::new(Arc::new(UnintegratedChainClient), verifier_lane, store, policy, audit, metrics)
        .with_retry_config(config.retry);

    let shutdown = glue.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.trigger();
        }
    });

    let mut completed = 0u32;
    loop {
        if cycles.is_some_and(|limit| completed >= limit) {
            break;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let report = glue.run_cycle(now.as_secs(), now.as_millis() as u64).await?;
        tracing::info!(
            scanned = report.scanned,
            completed = report.completed,
            escalated = report.escalated,
            claim_failures = report.claim_failures,
            "poll cycle complete"
        );
        completed += 1;
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
    }

    glue.shutdown().await?;
    Ok(())
}

/// Always reports an empty task list; `claim_task`/`complete_task` are
/// never reached through this client since nothing is ever subscribed.
struct UnintegratedChainClient;

#[async_trait]
impl ChainClient for UnintegratedChainClient {
    async fn subscribe_tasks(&self) -> Result<Vec<Task>, ChainClientError> {
        Ok(Vec::new())
    }

    async fn claim_task(&self, _task: &Task) -> Result<String, ChainClientError> {
        Err(ChainClientError::CallFailed("no chain client configured".to_string()))
    }

    async fn complete_task(&self, _task: &Task, _output: &[U256]) -> Result<String, ChainClientError> {
        Err(ChainClientError::CallFailed("no chain client configured".to_string()))
    }

    async fn get_slot(&self) -> Result<u64, ChainClientError> {
        Ok(0)
    }
}

struct UnintegratedExecutor;

#[async_trait]
impl Executor for UnintegratedExecutor {
    async fn execute(&self, _task: &Task, _seed: u64, _attempt: u32) -> ExecutionResult {
        ExecutionResult { output: Vec::new(), token_estimate: 0, cost_lamports: 0 }
    }

    async fn revise(&self, _task: &Task, _previous_output: &[U256], _reasons: &[String]) -> ExecutionResult {
        ExecutionResult { output: Vec::new(), token_estimate: 0, cost_lamports: 0 }
    }
}

struct UnintegratedVerifier;

#[async_trait]
impl Verifier for UnintegratedVerifier {
    async fn verify(
        &self,
        _task: &Task,
        _output: &[U256],
        _attempt: u32,
        _candidates: Option<&[agenc_runtime::types::Candidate]>,
    ) -> Result<VerifierOutcome, String> {
        Ok(VerifierOutcome::clamped(Verdict::Pass, 1.0, Vec::new()))
    }
}
