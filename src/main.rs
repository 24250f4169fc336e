//! Composition root: loads configuration, wires the Registry and Lifecycle
//! Controller together, binds the HTTP listener (bind-then-report), and
//! drives graceful shutdown on SIGINT/SIGTERM.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use llamagate_core::Config;
use llamagate_runtime::{Runtime, SupervisorConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug, Clone)]
#[command(name = "llamagated", about = "OpenAI-compatible gateway for local llama-server backends")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, overrides_with = "no_on_demand_only")]
    on_demand_only: bool,

    #[arg(long)]
    no_on_demand_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = llamagate_core::resolve_config_path(cli.config.as_deref(), std::env::var("CONFIG_PATH").ok().as_deref());

    let config = match load_config(&config_path, &cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config.settings.log_level);

    info!(path = %config_path.display(), "configuration loaded");

    match run(config, config_path, cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.to_string().contains("port conflict") => {
            error!(error = %e, "gateway listener port is already in use");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "gateway exited with an error");
            ExitCode::from(1)
        }
    }
}

fn load_config(path: &Path, cli: &Cli) -> Result<Config, llamagate_core::ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| llamagate_core::ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut config = Config::parse(&text, &path.display().to_string())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(host) = &cli.host {
        config.settings.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.settings.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.settings.log_level = level.clone();
    }
    if cli.on_demand_only {
        config.settings.on_demand_only = true;
    }
    if cli.no_on_demand_only {
        config.settings.on_demand_only = false;
    }

    Ok(config)
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config, config_path: std::path::PathBuf, cli: Cli) -> anyhow::Result<()> {
    check_for_inherited_backend_ports(&config)?;

    let bind_addr = format!("{}:{}", config.settings.host, config.settings.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("port conflict binding gateway listener on {bind_addr}: {e}"))?;
    info!(addr = %listener.local_addr()?, "gateway bound");

    let idle_timeout_secs = config.settings.idle_timeout_secs();
    let cleanup_interval = Duration::from_secs(config.settings.cleanup_interval_seconds);
    let on_demand_only = config.settings.on_demand_only;

    let supervisor_cfg = SupervisorConfig {
        binary_path: config.settings.llama_server_path.clone(),
        ..SupervisorConfig::default()
    };

    let runtime = Arc::new(Runtime::new(config, supervisor_cfg));
    runtime.auto_start_on_boot(on_demand_only).await;
    let _reaper = runtime.spawn_reaper(cleanup_interval, idle_timeout_secs);
    let _heartbeat = runtime.spawn_status_heartbeat();

    let state = llamagate_proxy::AppState::new(runtime.clone())?;
    let cancel = CancellationToken::new();

    let shutdown_signal = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining in-flight requests");
        shutdown_signal.cancel();
    });

    let reload_runtime = runtime.clone();
    tokio::spawn(async move {
        watch_for_reload(reload_runtime, config_path, cli).await;
    });

    let server_result = llamagate_proxy::serve(listener, state, cancel).await;

    info!("tearing down all running backends");
    shutdown_all_backends(&runtime).await;

    server_result
}

/// Boot-time crash recovery detection: reject configured backend ports that
/// are already bound by some other process rather than silently stealing or
/// adopting them.
fn check_for_inherited_backend_ports(config: &Config) -> anyhow::Result<()> {
    let ports: Vec<u16> = config.models.values().map(|m| m.port).collect();
    let occupied = llamagate_runtime::find_occupied_ports(&ports);
    if let Some(&port) = occupied.first() {
        return Err(llamagate_core::ConfigError::PortConflict { port }.into());
    }
    Ok(())
}

async fn shutdown_all_backends(runtime: &Runtime) {
    let snapshots = runtime.registry.snapshot_all().await;
    let shutdowns = snapshots.into_iter().map(|snapshot| async move {
        if let Some(handle) = runtime.registry.get(&snapshot.name).await {
            let _ = runtime.controller.stop_model(handle).await;
        }
    });
    futures_util::future::join_all(shutdowns).await;
}

/// Re-reads the config file on each SIGHUP and drives the diff through the
/// Lifecycle Controller (§6 "Reload semantics"). A bad config on reload is
/// logged and ignored; the gateway keeps running on whatever it had before.
#[cfg(unix)]
async fn watch_for_reload(runtime: Arc<Runtime>, config_path: std::path::PathBuf, cli: Cli) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGHUP handler, config reload disabled");
            return;
        }
    };

    loop {
        sighup.recv().await;
        info!(path = %config_path.display(), "SIGHUP received, reloading configuration");

        let new_config = match load_config(&config_path, &cli) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "reload aborted: failed to parse configuration");
                continue;
            }
        };

        let diff = runtime.reload(new_config).await;
        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            respawn = diff.respawn.len(),
            updated_in_place = diff.updated_in_place.len(),
            "reload applied"
        );
    }
}

#[cfg(not(unix))]
async fn watch_for_reload(_runtime: Arc<Runtime>, _config_path: std::path::PathBuf, _cli: Cli) {
    // No SIGHUP on non-unix platforms; reload is unavailable there.
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
