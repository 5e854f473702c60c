#![forbid(unsafe_code)]

//! `steward`: personal agent daemon.
//!
//! Bootstraps configuration, the history database, the reasoning-backend
//! client, channels (outbox plus the IPC socket for `steward-ctl`), and
//! the long-running loops: dispatcher, heartbeat, and scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use steward::channels::outbox::OutboxChannel;
use steward::channels::ChannelRegistry;
use steward::config::GlobalConfig;
use steward::ipc::server::{ControlPlane, IpcChannel};
use steward::orchestrator::actions::ActionExecutor;
use steward::orchestrator::delegates::DelegateRegistry;
use steward::orchestrator::dispatcher::{spawn_dispatch_loop, ConversationProcessor, Dispatcher};
use steward::orchestrator::drives::DriveState;
use steward::orchestrator::grievances::GrievanceLog;
use steward::orchestrator::heartbeat::Heartbeat;
use steward::orchestrator::missions::{BackendScriptRunner, MissionRegistry};
use steward::orchestrator::scheduler::{job, Scheduler};
use steward::orchestrator::task_manager::TaskManager;
use steward::persistence::db;
use steward::persistence::grievance_repo::GrievanceRepo;
use steward::persistence::history_repo::HistoryRepo;
use steward::rpc::client::BackendClient;
use steward::rpc::Reasoner;
use steward::tools::builtin::builtin_registry;
use steward::{AppError, Result};

/// Prompt used by the periodic security audit job.
const AUDIT_PROMPT: &str = "Perform a security audit of the workspace: look for exposed \
                            secrets, world-writable files, and suspicious recent changes. \
                            Report findings concisely.";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "steward", about = "Personal agent daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("steward daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

#[allow(clippy::too_many_lines)]
async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    if let Some(ws) = args.workspace {
        config.workspace_root = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }
    let config = Arc::new(config);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Initialize persistence ──────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    let history = HistoryRepo::new(Arc::clone(&db));
    let grievance_repo = GrievanceRepo::new(Arc::clone(&db));
    info!("database connected");

    // ── Reasoning backend ───────────────────────────────
    let backend = Arc::new(BackendClient::new(&config.backend));
    match backend.ping().await {
        Ok(()) => info!(socket = %backend.socket_path().display(), "reasoning backend reachable"),
        Err(err) => warn!(%err, "reasoning backend unreachable; replies will use the offline fallback"),
    }
    let reasoner: Arc<dyn Reasoner> = backend;

    // ── Channels ────────────────────────────────────────
    let ipc = Arc::new(IpcChannel::new(&config.ipc_name));
    let mut registry = ChannelRegistry::new(&config.dispatcher.fallback_channel);
    registry.register(Arc::new(OutboxChannel::new(config.outbox_path())));
    registry.register(Arc::clone(&ipc) as Arc<dyn steward::channels::Channel>);
    let channels = Arc::new(registry);

    // ── Core services ───────────────────────────────────
    let tasks = Arc::new(
        TaskManager::load(
            config.tasks_path(),
            Arc::clone(&reasoner),
            config.backend.task_timeout(),
        )?
        .with_history(history.clone())
        .with_channels(Arc::clone(&channels)),
    );
    tasks.recover().await?;

    let delegates = Arc::new(DelegateRegistry::load_dir(&config.delegates_dir())?);
    let missions = Arc::new(MissionRegistry::load(config.missions_path())?);
    let drives = Arc::new(DriveState::load(config.drives_path())?);
    let grievances = GrievanceLog::new(grievance_repo.clone(), Arc::clone(&reasoner));

    let script_timeout = Duration::from_secs(config.heartbeat.script_timeout_seconds);
    let tools = builtin_registry(
        config.workspace_root.clone(),
        script_timeout,
        Arc::clone(&channels),
        Arc::clone(&tasks),
    );
    let executor = ActionExecutor::new(
        tools,
        Arc::clone(&drives),
        grievances.clone(),
        &config.heartbeat,
    );
    let scripts = Arc::new(BackendScriptRunner::new(
        Arc::clone(&reasoner),
        config.workspace_root.clone(),
        script_timeout,
    ));
    let heartbeat = Arc::new(Heartbeat::new(
        Arc::clone(&reasoner),
        Arc::clone(&missions),
        Arc::clone(&drives),
        executor,
        grievances,
        Arc::clone(&channels),
        scripts,
        config.heartbeat.clone(),
        config.workspace_root.clone(),
    ));

    let scheduler = Arc::new(Scheduler::load(
        config.schedule_path(),
        Duration::from_secs(config.scheduler.tick_seconds),
    )?);
    register_default_jobs(&scheduler, &config, &tasks, &heartbeat, &grievance_repo).await?;

    ipc.attach(Arc::new(ControlPlane {
        tasks: Arc::clone(&tasks),
        missions: Arc::clone(&missions),
        scheduler: Arc::clone(&scheduler),
        heartbeat: Arc::clone(&heartbeat),
    }));

    // ── Dispatcher ──────────────────────────────────────
    let (dispatcher, queues) = Dispatcher::from_config(&config.dispatcher);
    let dispatcher = Arc::new(dispatcher);
    let processor = Arc::new(ConversationProcessor::new(
        Arc::clone(&reasoner),
        history,
        Arc::clone(&channels),
        Arc::clone(&tasks),
        delegates,
        Arc::clone(&missions),
        &config.dispatcher,
    ));

    // ── Start loops ─────────────────────────────────────
    let ct = CancellationToken::new();
    channels
        .start_all(&ct, &dispatcher.inbound_handler())
        .await?;

    let dispatch_handle = spawn_dispatch_loop(queues, processor, ct.clone());
    let scheduler_handle = scheduler.spawn_scheduler(ct.clone());
    let heartbeat_handle = if config.heartbeat.enabled {
        Some(heartbeat.spawn_heartbeat(ct.clone()))
    } else {
        info!("heartbeat disabled by configuration");
        None
    };

    info!(channels = ?channels.names(), "steward ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    channels.stop_all().await;

    if let Err(err) = dispatch_handle.await {
        error!(%err, "dispatch loop panicked");
    }
    if let Err(err) = scheduler_handle.await {
        error!(%err, "scheduler panicked");
    }
    if let Some(handle) = heartbeat_handle {
        if let Err(err) = handle.await {
            error!(%err, "heartbeat panicked");
        }
    }
    info!("steward shut down");

    Ok(())
}

/// Bind the built-in periodic jobs: security audit, reflection, and
/// grievance retention.
async fn register_default_jobs(
    scheduler: &Scheduler,
    config: &GlobalConfig,
    tasks: &Arc<TaskManager>,
    heartbeat: &Arc<Heartbeat>,
    grievances: &GrievanceRepo,
) -> Result<()> {
    let audit_tasks = Arc::clone(tasks);
    let audit = job(move |_cancel| {
        let tasks = Arc::clone(&audit_tasks);
        async move {
            match tasks.start_task(AUDIT_PROMPT, None).await {
                Ok(task) => info!(task_id = %task.id, "security audit task started"),
                Err(err) => error!(%err, "failed to start security audit"),
            }
        }
    });
    scheduler
        .schedule(
            "security_audit",
            hours(config.scheduler.audit_interval_hours),
            audit,
        )
        .await?;

    let reflect_heartbeat = Arc::clone(heartbeat);
    let reflection = job(move |_cancel| {
        let heartbeat = Arc::clone(&reflect_heartbeat);
        async move {
            info!("reflection: waking heartbeat");
            heartbeat.trigger();
        }
    });
    scheduler
        .schedule(
            "reflection",
            hours(config.scheduler.reflection_interval_hours),
            reflection,
        )
        .await?;

    let retention_repo = grievances.clone();
    let retention_days = i64::from(config.scheduler.retention_days);
    let retention = job(move |_cancel| {
        let repo = retention_repo.clone();
        async move {
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match repo.purge(cutoff).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "retention purged grievances"),
                Err(err) => error!(%err, "grievance retention failed"),
            }
        }
    });
    scheduler
        .schedule("retention", hours(24), retention)
        .await?;

    Ok(())
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.max(1) * 3600)
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
    let subscriber = fmt().with_env_filter(env_filter);

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
