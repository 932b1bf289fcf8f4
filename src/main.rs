#![forbid(unsafe_code)]

//! `agent-conductor` — task-loop host and heartbeat publisher.
//!
//! `loop` runs one supervised tool session per unchecked todolist task,
//! `wait` blocks until a persisted loop finishes, and `heartbeat` keeps a
//! session's liveness record fresh from inside that session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::config::GlobalConfig;
use agent_conductor::models::loop_state::LoopStatus;
use agent_conductor::models::promise::{Promise, PromiseStatus};
use agent_conductor::orchestrator::capacity::PatternClassifier;
use agent_conductor::orchestrator::health::{HealthEvaluator, HealthThresholds};
use agent_conductor::orchestrator::health_monitor::{spawn_health_monitor, HealthMonitor};
use agent_conductor::orchestrator::heartbeat::{retry_with_backoff, HeartbeatPublisher};
use agent_conductor::orchestrator::registry::SessionRegistry;
use agent_conductor::orchestrator::task_loop::{
    loop_id_for, wait_for_loop, LoopOptions, LoopOutcome, LoopScheduler,
};
use agent_conductor::persistence::crash_repo::CrashRepo;
use agent_conductor::persistence::health_repo::HealthRepo;
use agent_conductor::persistence::heartbeat_repo::HeartbeatRepo;
use agent_conductor::persistence::kv_store::KvStore;
use agent_conductor::persistence::loop_state_repo::LoopStateRepo;
use agent_conductor::persistence::promise_repo::PromiseStore;
use agent_conductor::persistence::{db, retention};
use agent_conductor::terminal::supervisor::{ENV_SESSION_ID, ENV_STORE};
use agent_conductor::terminal::PsProcessTree;
use agent_conductor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Supervise AI coding agents and run task loops", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one session per unchecked todolist task, in order.
    Loop {
        /// Todolist file with `[ ] task` lines.
        todolist: PathBuf,

        /// Loop identifier; derived from the todolist path when omitted.
        #[arg(long)]
        loop_id: Option<String>,

        /// Working directory for spawned sessions (default: current).
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Tool for the first task (default: `default_tool`).
        #[arg(long)]
        tool: Option<String>,

        /// Halt on the first `blocked` promise.
        #[arg(long)]
        stop_on_blocked: bool,

        /// Give up on a task after this many seconds without a promise.
        #[arg(long)]
        task_timeout_secs: Option<u64>,
    },

    /// Block until a loop reaches `completed` or `stopped`.
    Wait {
        /// Loop identifier.
        loop_id: String,
    },

    /// Publish heartbeats for a session until interrupted.
    Heartbeat {
        /// Session id (default: `CONDUCTOR_SESSION_ID`).
        #[arg(long)]
        session_id: Option<String>,

        /// Status tag written into each record.
        #[arg(long, default_value = "working")]
        status: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };
    // Sessions inherit the store of the conductor that spawned them.
    if let Some(store) = env_var(ENV_STORE) {
        config.store_path = PathBuf::from(store);
    }
    let config = Arc::new(config);

    match args.command {
        Command::Loop {
            todolist,
            loop_id,
            cwd,
            tool,
            stop_on_blocked,
            task_timeout_secs,
        } => {
            let cwd = match cwd {
                Some(cwd) => cwd,
                None => std::env::current_dir()?,
            };
            let loop_id = loop_id.unwrap_or_else(|| loop_id_for(&todolist));
            let mut options = LoopOptions::from_config(&config, loop_id, todolist, cwd);
            if let Some(tool) = tool {
                config.tool(&tool)?;
                options.tool = tool;
            }
            options.stop_on_blocked |= stop_on_blocked;
            if let Some(secs) = task_timeout_secs {
                options.task_timeout = (secs > 0).then_some(Duration::from_secs(secs));
            }
            options.parent_session_id = env_var(ENV_SESSION_ID);
            run_loop(config, options).await
        }
        Command::Wait { loop_id } => run_wait(&config, &loop_id).await,
        Command::Heartbeat { session_id, status } => {
            let session_id = session_id.or_else(|| env_var(ENV_SESSION_ID)).ok_or_else(|| {
                AppError::Config(format!("--session-id or {ENV_SESSION_ID} is required"))
            })?;
            run_heartbeat(&config, session_id, status).await
        }
    }
}

async fn open_store(config: &GlobalConfig) -> Result<KvStore> {
    let db = db::connect(&config.store_path).await?;
    info!(path = %config.store_path.display(), "store connected");
    Ok(KvStore::new(Arc::new(db)))
}

async fn run_loop(config: Arc<GlobalConfig>, options: LoopOptions) -> Result<()> {
    let store = open_store(&config).await?;

    // ── Background services ─────────────────────────────
    let ct = CancellationToken::new();
    let retention_handle = retention::spawn_retention_task(store.clone(), ct.clone());

    let promises = PromiseStore::new(store.clone());
    let (registry, exit_handle) = SessionRegistry::start(
        Arc::clone(&config),
        Arc::new(PsProcessTree),
        promises.clone(),
        CrashRepo::new(store.clone()),
        ct.clone(),
    );

    let monitor = HealthMonitor::new(
        registry.clone(),
        HeartbeatRepo::new(store.clone(), config.heartbeat_ttl()),
        HealthRepo::new(store.clone()),
        HealthEvaluator::new(HealthThresholds::from_config(&config)),
        config.health.sample_lines,
    );
    let health_handle = spawn_health_monitor(
        monitor,
        Duration::from_secs(config.health.check_interval_seconds),
        ct.clone(),
    );

    // A nested loop keeps its hosting session's heartbeat alive.
    let heartbeat_handle = options.parent_session_id.clone().map(|session_id| {
        let publisher = HeartbeatPublisher::new(
            HeartbeatRepo::new(store.clone(), config.heartbeat_ttl()),
            session_id,
            "looping",
            config.heartbeat_interval(),
        );
        tokio::spawn(publisher.run(ct.clone()))
    });

    // ── Scheduler ───────────────────────────────────────
    let scheduler = LoopScheduler::new(
        Arc::new(registry.clone()),
        promises.clone(),
        LoopStateRepo::new(store.clone()),
        Arc::new(PatternClassifier::from_config(&config)?),
    )
    .with_fallbacks_from(&config);

    let loop_cancel = CancellationToken::new();
    let signal_cancel = loop_cancel.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let result = scheduler.run(&options, &loop_cancel).await;
    signal_task.abort();

    if let Some(ref host) = options.parent_session_id {
        publish_host_promise(&promises, host, &result).await;
    }

    // ── Shutdown ────────────────────────────────────────
    registry.close().await;
    ct.cancel();
    let _ = tokio::join!(retention_handle, exit_handle, health_handle);
    if let Some(handle) = heartbeat_handle {
        let _ = handle.await;
    }

    let outcome = result?;
    info!(
        loop_id = %outcome.loop_id,
        tasks_done = outcome.tasks_done,
        total = outcome.total,
        active_tool = %outcome.active_tool,
        stop = ?outcome.stop,
        "loop finished"
    );
    Ok(())
}

async fn publish_host_promise(promises: &PromiseStore, host: &str, result: &Result<LoopOutcome>) {
    let promise = match result {
        Ok(outcome) => outcome.host_promise(host),
        Err(err) => {
            let mut promise = Promise::new(host, PromiseStatus::Blocked, "loop aborted");
            promise.blockers = Some(vec![err.to_string()]);
            Some(promise)
        }
    };
    if let Some(promise) = promise {
        if let Err(err) = promises.set_promise(&promise).await {
            error!(session_id = host, %err, "failed to publish promise for hosting session");
        }
    }
}

async fn run_wait(config: &GlobalConfig, loop_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let states = LoopStateRepo::new(store);

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        signal_ct.cancel();
    });

    info!(loop_id, "waiting for loop");
    let state = wait_for_loop(&states, loop_id, config.poll_interval(), &ct).await;
    signal_task.abort();

    let Some(state) = state else {
        warn!(loop_id, "wait interrupted");
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    match state.status {
        LoopStatus::Stopped => Err(AppError::Loop(format!(
            "loop {loop_id} stopped: {}",
            state.reason.unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

async fn run_heartbeat(config: &GlobalConfig, session_id: String, status: String) -> Result<()> {
    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_ct.cancel();
    });

    let Some(store) = retry_with_backoff("store connect", &ct, || open_store(config)).await else {
        return Ok(());
    };
    let publisher = HeartbeatPublisher::new(
        HeartbeatRepo::new(store, config.heartbeat_ttl()),
        session_id,
        status,
        config.heartbeat_interval(),
    );
    publisher.run(ct).await;
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
