//! Process Supervisor: spawns, health-checks, and terminates a single
//! backend process for one model.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use llamagate_core::ModelConfig;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::log_tail::LogTail;

/// Default readiness probe interval.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// Default per-attempt HTTP timeout for the readiness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default overall readiness deadline.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(180);
/// Default graceful-stop grace period before SIGKILL escalation.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunable knobs for one supervised process; defaults match §4.1.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binary_path: String,
    pub health_path: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            binary_path: "llama-server".to_string(),
            health_path: "/health".to_string(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// A process that has been spawned and brought to readiness (or is in the
/// process of being probed for it).
pub struct RunningProcess {
    child: Child,
    pub log_tail: Arc<LogTail>,
    pub port: u16,
}

impl RunningProcess {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// `Some(status)` if the child has already exited; never blocks.
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn backend process: {0}")]
    Spawn(String),

    #[error("backend exited before becoming ready (tail):\n{tail}")]
    ExitedBeforeReady { tail: String },

    #[error("backend did not become ready within {0:?} (tail):\n{1}")]
    ReadinessTimeout(Duration, String),

    #[error("failed to terminate backend: {0}")]
    Terminate(String),
}

/// Spawn a backend process for `model`, returning once the process handle
/// and its log readers are wired up. Does not wait for readiness; call
/// [`wait_ready`] next.
pub fn spawn(model: &ModelConfig, cfg: &SupervisorConfig) -> Result<RunningProcess, SupervisorError> {
    let args = build_args(model);
    debug!(model = %model.name, binary = %cfg.binary_path, ?args, "spawning backend");

    let mut command = Command::new(&cfg.binary_path);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

    let log_tail = Arc::new(LogTail::default());
    spawn_log_reader(child.stdout.take(), log_tail.clone());
    spawn_log_reader(child.stderr.take(), log_tail.clone());

    info!(model = %model.name, port = model.port, pid = ?child.id(), "backend spawned");

    Ok(RunningProcess {
        child,
        log_tail,
        port: model.port,
    })
}

fn build_args(model: &ModelConfig) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        model.model_path.clone(),
        "--port".to_string(),
        model.port.to_string(),
        "--host".to_string(),
        "127.0.0.1".to_string(),
    ];
    if let Some(ctx) = model.context_length {
        args.push("--ctx-size".to_string());
        args.push(ctx.to_string());
    }
    if let Some(layers) = model.gpu_layers {
        args.push("--gpu-layers".to_string());
        args.push(layers.to_string());
    }
    args.extend(model.tokenized_args());
    args
}

/// Spawn a task that feeds each line from the pipe into the tail buffer.
/// Runs on the tokio runtime rather than a blocking thread since the pipe is
/// an async handle; a stalled backend just leaves the reader task idle.
fn spawn_log_reader<R>(pipe: Option<R>, tail: Arc<LogTail>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else { return };
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tail.push(line);
        }
    });
}

/// Poll the backend's health endpoint until it answers 2xx, the process
/// exits, or `start_timeout` elapses.
pub async fn wait_ready(
    process: &mut RunningProcess,
    cfg: &SupervisorConfig,
) -> Result<(), SupervisorError> {
    let health_url = format!("http://127.0.0.1:{}{}", process.port, cfg.health_path);
    let client = reqwest::Client::builder()
        .timeout(cfg.probe_timeout)
        .build()
        .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

    let deadline = tokio::time::Instant::now() + cfg.start_timeout;

    loop {
        if let Ok(Some(_status)) = process.try_exit_status() {
            return Err(SupervisorError::ExitedBeforeReady {
                tail: process.log_tail.snapshot_text(),
            });
        }

        match client.get(&health_url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(port = process.port, "backend is ready");
                return Ok(());
            }
            Ok(response) => {
                debug!(port = process.port, status = %response.status(), "not ready yet");
            }
            Err(e) => {
                debug!(port = process.port, error = %e, "health probe failed, retrying");
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(SupervisorError::ReadinessTimeout(
                cfg.start_timeout,
                process.log_tail.snapshot_text(),
            ));
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        sleep(cfg.probe_interval.min(remaining)).await;
    }
}

/// Gracefully terminate a running backend: SIGTERM, wait up to
/// `stop_timeout`, escalate to SIGKILL, and reap so no zombie is left behind.
pub async fn terminate(
    process: RunningProcess,
    cfg: &SupervisorConfig,
) -> Result<(), SupervisorError> {
    shutdown_child(process.child, cfg.stop_timeout)
        .await
        .map(|_status| ())
        .map_err(|e| SupervisorError::Terminate(e.to_string()))
}

#[cfg(unix)]
async fn shutdown_child(
    mut child: Child,
    stop_timeout: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(std::io::Error::other(e));
    }

    match timeout(stop_timeout, child.wait()).await {
        Ok(result) => return result,
        Err(_) => {
            warn!(pid, "backend did not exit after SIGTERM, escalating to SIGKILL");
        }
    }

    child.kill().await?;
    child.wait().await
}

#[cfg(not(unix))]
async fn shutdown_child(
    mut child: Child,
    _stop_timeout: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    child.kill().await?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(port: u16) -> ModelConfig {
        ModelConfig {
            name: "m1".into(),
            port,
            model_path: "/models/m1.gguf".into(),
            context_length: Some(4096),
            gpu_layers: Some(20),
            chat_format: None,
            additional_args: vec!["--jinja".into()],
            priority: 5,
            resource_group: None,
            auto_start: false,
            preload: false,
            max_queue_size: None,
            request_timeout_secs: None,
        }
    }

    #[test]
    fn build_args_includes_model_and_optional_flags() {
        let args = build_args(&model(19001));
        assert_eq!(
            args,
            vec![
                "--model", "/models/m1.gguf", "--port", "19001", "--host", "127.0.0.1",
                "--ctx-size", "4096", "--gpu-layers", "20", "--jinja",
            ]
        );
    }

    #[tokio::test]
    async fn spawn_and_terminate_a_real_short_lived_process() {
        let cfg = SupervisorConfig {
            binary_path: "sleep".to_string(),
            ..Default::default()
        };
        let m = ModelConfig {
            additional_args: vec!["30".into()],
            ..model(0)
        };
        // `sleep 30 --model ... --port 0 --host 127.0.0.1` ignores the extra
        // flags and just sleeps; good enough to exercise spawn/terminate.
        let process = spawn(&m, &cfg);
        if let Ok(process) = process {
            terminate(process, &cfg).await.unwrap();
        }
    }
}
