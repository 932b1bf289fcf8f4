#![forbid(unsafe_code)]

//! `agent-conductor-ctl` — store-side companion for `agent-conductor`.
//!
//! Opens the shared store directly, so it works from inside a supervised
//! session (where `CONDUCTOR_STORE` and `CONDUCTOR_SESSION_ID` are set)
//! as well as from an operator shell. Every read prints JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use agent_conductor::config::GlobalConfig;
use agent_conductor::models::promise::{Promise, PromiseStatus};
use agent_conductor::orchestrator::health::{HealthEvaluator, HealthThresholds};
use agent_conductor::persistence::crash_repo::CrashRepo;
use agent_conductor::persistence::health_repo::HealthRepo;
use agent_conductor::persistence::heartbeat_repo::HeartbeatRepo;
use agent_conductor::persistence::kv_store::KvStore;
use agent_conductor::persistence::loop_state_repo::LoopStateRepo;
use agent_conductor::persistence::promise_repo::PromiseStore;
use agent_conductor::persistence::db;
use agent_conductor::terminal::supervisor::{ENV_SESSION_ID, ENV_STORE};
use agent_conductor::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-conductor-ctl",
    about = "Read and write the agent-conductor store",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store file; overrides `CONDUCTOR_STORE` and the configured path.
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Completion promises.
    #[command(subcommand)]
    Promise(PromiseCommand),

    /// Heartbeat classification and last stored check for a session.
    Health {
        /// Session id (default: `CONDUCTOR_SESSION_ID`).
        session_id: Option<String>,
    },

    /// Latest fleet-wide health summary.
    Summary,

    /// Crash history of a session, oldest first.
    Crashes {
        /// Session id.
        session_id: String,
    },

    /// All persisted loops.
    Loops,

    /// One persisted loop.
    LoopStatus {
        /// Loop identifier.
        loop_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum PromiseCommand {
    /// Publish this session's promise.
    Set {
        /// `completed`, `blocked`, or `needs_review`.
        status: PromiseStatus,

        /// One-line summary of the work.
        summary: String,

        /// Session id (default: `CONDUCTOR_SESSION_ID`).
        #[arg(long)]
        session_id: Option<String>,

        /// File touched by the work; repeatable.
        #[arg(long = "file")]
        files: Vec<String>,

        /// Reason the work cannot proceed; repeatable.
        #[arg(long = "blocker")]
        blockers: Vec<String>,
    },

    /// Show a session's promise.
    Get {
        /// Session id (default: `CONDUCTOR_SESSION_ID`).
        session_id: Option<String>,
    },

    /// Show every stored promise keyed by session id.
    List,

    /// Clear a session's promise so it can be worked again.
    Resume {
        /// Session id (default: `CONDUCTOR_SESSION_ID`).
        session_id: Option<String>,
    },
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(value) => println!("{value:#}"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<serde_json::Value> {
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };
    let store_path = args
        .store
        .or_else(|| env_var(ENV_STORE).map(PathBuf::from))
        .unwrap_or_else(|| config.store_path.clone());
    let kv = KvStore::new(Arc::new(db::connect(&store_path).await?));

    match args.command {
        Command::Promise(command) => run_promise(PromiseStore::new(kv), command).await,
        Command::Health { session_id } => {
            let session_id = session_or_env(session_id)?;
            let evaluator = HealthEvaluator::new(HealthThresholds::from_config(&config));
            let heartbeats = HeartbeatRepo::new(kv.clone(), config.heartbeat_ttl());
            let (heartbeat, age) = evaluator
                .heartbeat_health(&heartbeats, &session_id, Utc::now())
                .await;
            let last_check = HealthRepo::new(kv).get_check(&session_id).await?;
            let status = last_check.as_ref().map(|check| check.resolve().as_str());
            Ok(serde_json::json!({
                "session_id": session_id,
                "heartbeat": heartbeat,
                "heartbeat_age_secs": age.map(|age| age.as_secs()),
                "last_check": last_check,
                "status": status,
            }))
        }
        Command::Summary => {
            let summary = HealthRepo::new(kv).get_summary().await?.unwrap_or_default();
            Ok(serde_json::to_value(summary)?)
        }
        Command::Crashes { session_id } => {
            let crashes = CrashRepo::new(kv);
            let state = crashes.load_state(&session_id).await?;
            let events = crashes.crash_events(&session_id).await?;
            Ok(serde_json::json!({
                "session_id": session_id,
                "state": state,
                "events": events,
            }))
        }
        Command::Loops => Ok(serde_json::to_value(LoopStateRepo::new(kv).list().await?)?),
        Command::LoopStatus { loop_id } => {
            let state = LoopStateRepo::new(kv)
                .load(&loop_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("loop {loop_id}")))?;
            Ok(serde_json::to_value(state)?)
        }
    }
}

async fn run_promise(
    promises: PromiseStore,
    command: PromiseCommand,
) -> Result<serde_json::Value> {
    match command {
        PromiseCommand::Set {
            status,
            summary,
            session_id,
            files,
            blockers,
        } => {
            let mut promise = Promise::new(session_or_env(session_id)?, status, summary);
            promise.files = (!files.is_empty()).then_some(files);
            promise.blockers = (!blockers.is_empty()).then_some(blockers);
            promises.set_promise(&promise).await?;
            Ok(serde_json::to_value(promise)?)
        }
        PromiseCommand::Get { session_id } => {
            let session_id = session_or_env(session_id)?;
            let promise = promises
                .get_promise(&session_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("promise for session {session_id}")))?;
            Ok(serde_json::to_value(promise)?)
        }
        PromiseCommand::List => Ok(serde_json::to_value(promises.get_promises().await?)?),
        PromiseCommand::Resume { session_id } => {
            let session_id = session_or_env(session_id)?;
            let cleared = promises.resume(&session_id).await?;
            Ok(serde_json::json!({
                "session_id": session_id,
                "cleared": cleared,
            }))
        }
    }
}

fn session_or_env(session_id: Option<String>) -> Result<String> {
    session_id
        .or_else(|| env_var(ENV_SESSION_ID))
        .ok_or_else(|| AppError::Config(format!("session id or {ENV_SESSION_ID} is required")))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
