//! Idle Reaper (§4.6): periodically stops READY, non-preloaded models that
//! have been idle past the configured timeout, and sweeps expired queue
//! entries so a stalled start never leaves a client waiting forever.
//!
//! Also hosts the Status Channel's heartbeat (§4.9): a fixed-interval full
//! snapshot so a slow or newly-attached subscriber is never more than one
//! heartbeat stale, independent of whether any transition has fired.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use llamagate_core::ModelState;
use tracing::info;

use crate::controller::LifecycleController;

/// Fixed interval for the Status Channel's heartbeat snapshot; not
/// configurable per spec (§4.9 describes it as "a fixed heartbeat interval").
pub const DEFAULT_STATUS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Runs `sweep` on a fixed interval until the returned handle is dropped or
/// aborted.
pub fn spawn_idle_reaper(
    controller: LifecycleController,
    cleanup_interval: Duration,
    idle_timeout_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        loop {
            ticker.tick().await;
            sweep(&controller, idle_timeout_secs).await;
        }
    })
}

/// Runs a fixed-interval full-snapshot heartbeat onto the status channel
/// until the returned handle is dropped or aborted.
pub fn spawn_status_heartbeat(
    controller: LifecycleController,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshots = controller.registry().snapshot_all().await;
            controller.status_broadcaster().publish_snapshot(snapshots);
        }
    })
}

async fn sweep(controller: &LifecycleController, idle_timeout_secs: u64) {
    let now = now_unix();
    let registry = controller.registry();
    let snapshots = registry.snapshot_all().await;

    for snapshot in snapshots {
        if snapshot.state != ModelState::Ready || snapshot.preload {
            continue;
        }
        let idle_for = snapshot
            .last_activity_ts
            .map(|ts| now.saturating_sub(ts))
            .unwrap_or_else(|| snapshot.start_ts.map(|ts| now.saturating_sub(ts)).unwrap_or(0));

        if idle_for as u64 >= idle_timeout_secs {
            if let Some(handle) = registry.get(&snapshot.name).await {
                info!(model = %snapshot.name, idle_for, "idle timeout reached, stopping");
                let _ = controller.stop_model(handle.clone()).await;
                handle.queue.sweep_timeouts();
            }
        } else if let Some(handle) = registry.get(&snapshot.name).await {
            handle.queue.sweep_timeouts();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamagate_core::{Config, GatewaySettings, ModelConfig};
    use std::collections::HashMap;

    fn config_with_idle_model() -> Config {
        let mut models = HashMap::new();
        models.insert(
            "m1".to_string(),
            ModelConfig {
                name: "m1".into(),
                port: 19001,
                model_path: "/models/m1.gguf".into(),
                context_length: None,
                gpu_layers: None,
                chat_format: None,
                additional_args: vec![],
                priority: 5,
                resource_group: None,
                auto_start: false,
                preload: false,
                max_queue_size: None,
                request_timeout_secs: None,
            },
        );
        Config {
            settings: GatewaySettings::default(),
            models,
        }
    }

    #[tokio::test]
    async fn sweep_ignores_models_that_are_not_ready() {
        use crate::registry::Registry;
        use crate::supervisor::SupervisorConfig;
        use llamagate_core::StatusBroadcaster;

        let registry = Arc::new(Registry::new(config_with_idle_model()));
        let controller = LifecycleController::new(registry.clone(), SupervisorConfig::default(), StatusBroadcaster::new());

        // A Stopped model should never be targeted by the reaper.
        sweep(&controller, 0).await;
        let handle = registry.get("m1").await.unwrap();
        assert_eq!(handle.state().await, ModelState::Stopped);
    }

    #[tokio::test]
    async fn heartbeat_publishes_a_snapshot_without_any_transition() {
        use crate::registry::Registry;
        use crate::supervisor::SupervisorConfig;
        use llamagate_core::{StatusBroadcaster, StatusEvent};

        let registry = Arc::new(Registry::new(config_with_idle_model()));
        let status = StatusBroadcaster::new();
        let controller = LifecycleController::new(registry, SupervisorConfig::default(), status.clone());
        let mut rx = status.subscribe();

        let handle = spawn_status_heartbeat(controller, Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("heartbeat did not fire in time")
            .unwrap();
        assert!(matches!(event, StatusEvent::Snapshot { models } if models.len() == 1));

        handle.abort();
    }
}
