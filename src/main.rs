//! ORBIT - ambient desktop agent
//!
//! Wires configuration, logging, storage, the monitor adapters, and the
//! orchestrator tick loop together and runs until a shutdown signal.
//!
//! # Usage
//!
//! ```bash
//! # Run with built-in defaults (dummy/fallback proposer, no LLM required)
//! cargo run --release
//!
//! # Point at a config file explicitly
//! ORBIT_CONFIG=orbit.toml cargo run --release
//! ```
//!
//! # Environment Variables
//!
//! - `ORBIT_CONFIG`: Path to a TOML config file (see `orbit::config`)
//! - `RUST_LOG`: Logging level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use orbit::broadcast::{self, Broadcaster};
use orbit::config::{self, watcher, AiMode, OrbitConfig};
use orbit::context::ContextAggregator;
use orbit::decision::DecisionGate;
use orbit::fsm::BehaviorFsm;
use orbit::intent::IntentProposer;
use orbit::llm::LlmClient;
use orbit::monitors::{AnnouncedWindowMonitor, RingFileWatcher, SystemIdleMonitor};
use orbit::storage::EventLog;
use orbit::Orchestrator;

/// Shutdown join timeout (spec §5 "bounded timeout, default 5s").
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "orbit")]
#[command(about = "ORBIT ambient desktop agent: context -> intent -> decision -> suggestion")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file. Overrides ORBIT_CONFIG and orbit.toml autodiscovery.
    #[arg(long)]
    config: Option<String>,

    /// Override ai_mode: ollama, dummy, or auto.
    #[arg(long)]
    ai_mode: Option<String>,

    /// Override the UI broadcast bind address (e.g. localhost:8012).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    if let Some(path) = &args.config {
        std::env::set_var("ORBIT_CONFIG", path);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut cfg = OrbitConfig::load();
    if let Some(mode) = args.ai_mode.as_deref() {
        cfg.mutable.ai_mode = match mode.to_ascii_lowercase().as_str() {
            "ollama" => AiMode::Ollama,
            "dummy" => AiMode::Dummy,
            _ => AiMode::Auto,
        };
    }
    if let Some(bind) = args.bind {
        cfg.broadcast.bind_addr = bind;
    }
    config::init(cfg);
    let cfg = config::get();

    info!("======================================================");
    info!("Starting ORBIT");
    info!("======================================================");

    let event_log = match EventLog::open(&cfg.storage.db_path) {
        Ok(log) => {
            info!(path = %cfg.storage.db_path.display(), "Event log opened");
            match log.cleanup_older_than(cfg.storage.retention_days) {
                Ok(n) if n > 0 => info!(deleted = n, "Pruned stale event-log entries"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to prune event log"),
            }
            Some(log)
        }
        Err(e) => {
            error!(error = %e, "Failed to open event-log sink — this is fatal at startup");
            return Err(e).context("opening event-log sink");
        }
    };

    let window = Arc::new(AnnouncedWindowMonitor::new());
    let idle = Arc::new(SystemIdleMonitor::new());
    let files = Arc::new(RingFileWatcher::default());
    let context = ContextAggregator::new(window, idle, files);

    let llm = LlmClient::new(cfg.llm.base_url.clone(), cfg.llm_timeout());
    let mut proposer = IntentProposer::new(
        cfg.mutable.ai_mode,
        cfg.mutable.ai_model.clone(),
        llm,
        Duration::from_secs(cfg.variety_pool.min_interval_secs),
    );
    proposer.refresh_health().await;

    let gate = DecisionGate::new(cfg.decision.clone());

    let (fsm_tx, fsm_rx) = tokio::sync::mpsc::channel(64);
    let fsm = BehaviorFsm::new(fsm_tx);

    let (broadcaster, inbound_rx) = Broadcaster::new(cfg.broadcast.subscriber_channel_capacity);

    let orchestrator = Orchestrator::new(
        context,
        proposer,
        gate,
        fsm,
        fsm_rx,
        broadcaster.clone(),
        inbound_rx,
        event_log,
        cfg.polling_interval(),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown.cancel();
    });

    let bind_addr = cfg.broadcast.bind_addr.clone();
    let ping_interval = Duration::from_secs(cfg.broadcast.ping_interval_secs);
    let ping_timeout = Duration::from_secs(cfg.broadcast.ping_timeout_secs);

    let mut tasks: JoinSet<&'static str> = JoinSet::new();

    let ws_router = broadcast::router(broadcaster.clone(), cancel.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind UI socket at {bind_addr}"))?;
    info!(addr = %bind_addr, "UI broadcast listening");

    let http_cancel = cancel.clone();
    tasks.spawn(async move {
        let _ = axum::serve(listener, ws_router)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
            })
            .await;
        "ui_broadcast"
    });

    let heartbeat_broadcaster = broadcaster.clone();
    let heartbeat_cancel = cancel.clone();
    tasks.spawn(async move {
        broadcast::run_heartbeat(heartbeat_broadcaster, ping_interval, ping_timeout, heartbeat_cancel)
            .await;
        "heartbeat"
    });

    if let Some(path) = cfg.mutable.watch_path.clone().or_else(|| config_path()) {
        let (cfg_tx, mut cfg_rx) = tokio::sync::mpsc::channel(8);
        let watcher_cancel = cancel.clone();
        tasks.spawn(async move {
            watcher::run_config_watcher(path, cfg_tx, watcher_cancel).await;
            "config_watcher"
        });
        tokio::spawn(async move {
            while let Some(event) = cfg_rx.recv().await {
                match event {
                    watcher::ConfigEvent::Reloaded(changes) if !changes.is_empty() => {
                        for change in changes {
                            info!(field = change.field, old = change.old, new = change.new, "config reloaded");
                        }
                    }
                    watcher::ConfigEvent::Reloaded(_) => {}
                    watcher::ConfigEvent::Error(e) => warn!(error = %e, "config reload failed"),
                }
            }
        });
    }

    let orchestrator_cancel = cancel.clone();
    tasks.spawn(async move {
        let stats = orchestrator.run(orchestrator_cancel).await;
        info!("{}", stats);
        "orchestrator"
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok(name)) => info!(task = name, "task exited"),
                    Some(Err(e)) => {
                        error!(error = %e, "task panicked");
                        cancel.cancel();
                    }
                    None => break,
                }
            }
        }
    }

    if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("shutdown join timeout elapsed, some tasks may not have exited cleanly");
    }

    info!("ORBIT stopped");
    Ok(())
}

fn config_path() -> Option<std::path::PathBuf> {
    std::env::var("ORBIT_CONFIG").ok().map(std::path::PathBuf::from)
}
