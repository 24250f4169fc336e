//! Lifecycle Controller (§4.3): the per-model state machine. Serializes
//! start/stop/reload for a given model through its `transition_lock`, and
//! enforces the global concurrency cap with priority-based eviction.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use llamagate_core::{GatewayError, ModelConfig, ModelState, StatusBroadcaster};
use tracing::{error, info, warn};

use crate::admission::AdmissionDecision;
use crate::admission::AdmissionController;
use crate::handle::{ModelHandle, TRANSPORT_FAILURE_DEMOTION_THRESHOLD};
use crate::queue::QueueOutcome;
use crate::registry::Registry;
use crate::supervisor::{self, SupervisorConfig};

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Inner {
    registry: Arc<Registry>,
    admission: AdmissionController,
    supervisor_cfg: SupervisorConfig,
    status: StatusBroadcaster,
}

/// Drives every model's state machine. Cheap to clone; all state lives
/// behind the shared `Registry` and `ModelHandle`s.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(registry: Arc<Registry>, supervisor_cfg: SupervisorConfig, status: StatusBroadcaster) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                admission: AdmissionController::new(),
                supervisor_cfg,
                status,
            }),
        }
    }

    /// Resolve a model to READY, queueing and waiting across a cold start if
    /// necessary. Returns the backend port to forward to.
    pub async fn ensure_ready(&self, model_name: &str) -> Result<u16, GatewayError> {
        let handle = self
            .inner
            .registry
            .get(model_name)
            .await
            .ok_or_else(|| GatewayError::ModelNotFound(model_name.to_string()))?;

        loop {
            let state = handle.state().await;
            if state == ModelState::Ready {
                let port = handle.config.read().await.port;
                return Ok(port);
            }

            let rx = handle.queue.enqueue()?;
            self.trigger_start(handle.clone());

            match rx.await {
                Ok(QueueOutcome::Proceed) => continue,
                Ok(QueueOutcome::Failed(err)) => return Err(err),
                Err(_) => return Err(GatewayError::ClientCancelled(model_name.to_string())),
            }
        }
    }

    /// Fire-and-forget: spawn a detached task that drives `handle` toward
    /// READY. Does not itself decide whether a transition is already in
    /// flight — that's `start_model`'s job, via `transition_lock` — so
    /// multiple concurrent callers each spawn a task, and every one past the
    /// first just waits for the lock and then observes the now-resolved
    /// state.
    fn trigger_start(&self, handle: Arc<ModelHandle>) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.start_model(handle).await {
                warn!(error = %e, "start attempt did not complete successfully");
            }
        });
    }

    /// Explicit start-request. Idempotent: a READY model returns success
    /// immediately. Waits on `transition_lock` if another transition
    /// (STARTING/STOPPING/RELOADING) is already in flight, then re-observes
    /// the resulting state rather than racing it.
    pub async fn start_model(&self, handle: Arc<ModelHandle>) -> Result<(), GatewayError> {
        let _guard = handle.transition_lock.lock().await;

        let from = handle.state().await;
        if from == ModelState::Ready {
            return Ok(());
        }
        if !matches!(from, ModelState::Stopped | ModelState::Failed) {
            return Ok(());
        }

        let config = handle.config.read().await.clone();
        self.start_model_locked(&handle, &config, from).await
    }

    async fn start_model_locked(
        &self,
        handle: &Arc<ModelHandle>,
        config: &ModelConfig,
        from: ModelState,
    ) -> Result<(), GatewayError> {
        let max_concurrent = self.inner.registry.current_config().await.settings.max_concurrent_models;

        loop {
            let snapshots = self.inner.registry.snapshot_all().await;
            let (guard, decision) = self.inner.admission.admit(&snapshots, &config.name, max_concurrent).await;
            match decision {
                AdmissionDecision::Admit => {
                    // Commit to STARTING before releasing the admission lock so
                    // no concurrent start-request can observe this slot as free.
                    handle.set_state(ModelState::Starting).await;
                    drop(guard);
                    break;
                }
                AdmissionDecision::Evict { victim } => {
                    drop(guard);
                    info!(model = %config.name, %victim, "evicting to make room");
                    self.stop_model_by_name(&victim).await;
                }
                AdmissionDecision::Deny => {
                    drop(guard);
                    let err = GatewayError::AdmissionDenied { model: config.name.clone() };
                    handle.queue.fail(err.clone());
                    handle.set_state(ModelState::Failed).await;
                    return Err(err);
                }
            }
        }

        self.inner.status.publish_transition(&config.name, from, ModelState::Starting);

        let mut process = match supervisor::spawn(config, &self.inner.supervisor_cfg) {
            Ok(p) => p,
            Err(e) => {
                return self.fail_start(handle, config, e.to_string()).await;
            }
        };

        match supervisor::wait_ready(&mut process, &self.inner.supervisor_cfg).await {
            Ok(()) => {
                *handle.process.lock().await = Some(process);
                handle.mark_started(now_unix());
                handle.set_state(ModelState::Ready).await;
                self.inner.status.publish_transition(&config.name, ModelState::Starting, ModelState::Ready);
                handle.queue.drain();
                info!(model = %config.name, "model is ready");
                Ok(())
            }
            Err(e) => self.fail_start(handle, config, e.to_string()).await,
        }
    }

    async fn fail_start(
        &self,
        handle: &Arc<ModelHandle>,
        config: &ModelConfig,
        reason: String,
    ) -> Result<(), GatewayError> {
        handle.set_state(ModelState::Failed).await;
        self.inner.status.publish_transition(&config.name, ModelState::Starting, ModelState::Failed);
        let err = GatewayError::StartFailure {
            model: config.name.clone(),
            reason,
        };
        handle.queue.fail(err.clone());
        error!(model = %config.name, error = %err, "model failed to start");
        Err(err)
    }

    /// Explicit stop-request. A STOPPED model returns success as a no-op.
    pub async fn stop_model(&self, handle: Arc<ModelHandle>) -> Result<(), GatewayError> {
        let _guard = handle.transition_lock.lock().await;
        let from = handle.state().await;
        if from == ModelState::Stopped {
            return Ok(());
        }
        if !matches!(from, ModelState::Ready | ModelState::Failed) {
            // Stopping/Starting/Reloading already resolve to a terminal
            // state under this same lock before we could observe them here.
            return Ok(());
        }

        let config = handle.config.read().await.clone();
        handle.set_state(ModelState::Stopping).await;
        self.inner.status.publish_transition(&config.name, from, ModelState::Stopping);

        if let Some(process) = handle.process.lock().await.take() {
            if let Err(e) = supervisor::terminate(process, &self.inner.supervisor_cfg).await {
                error!(model = %config.name, error = %e, "error terminating backend");
            }
        }
        handle.mark_stopped();
        handle.set_state(ModelState::Stopped).await;
        self.inner.status.publish_transition(&config.name, ModelState::Stopping, ModelState::Stopped);
        info!(model = %config.name, "model stopped");

        drop(_guard);
        if handle.queue.depth() > 0 {
            self.trigger_start(handle);
        }
        Ok(())
    }

    async fn stop_model_by_name(&self, name: &str) {
        if let Some(handle) = self.inner.registry.get(name).await {
            if let Err(e) = self.stop_model(handle).await {
                warn!(model = %name, error = %e, "eviction stop failed");
            }
        }
    }

    /// Reload a READY model in place: spawn the replacement, then tear down
    /// the original once the new one answers ready. On failure, tear down
    /// both and leave the entry FAILED.
    pub async fn reload_model(&self, handle: Arc<ModelHandle>, new_config: ModelConfig) -> Result<(), GatewayError> {
        let _guard = handle.transition_lock.lock().await;
        let from = handle.state().await;
        if from != ModelState::Ready {
            // Only a running model can be hot-reloaded; anything else just
            // gets the new config applied for its next start.
            *handle.config.write().await = new_config;
            return Ok(());
        }

        handle.set_state(ModelState::Reloading).await;
        self.inner.status.publish_transition(&new_config.name, from, ModelState::Reloading);

        let mut new_process = match supervisor::spawn(&new_config, &self.inner.supervisor_cfg) {
            Ok(p) => p,
            Err(e) => return self.fail_reload(&handle, &new_config).await.and(Err(
                GatewayError::StartFailure { model: new_config.name.clone(), reason: e.to_string() },
            )),
        };

        match supervisor::wait_ready(&mut new_process, &self.inner.supervisor_cfg).await {
            Ok(()) => {
                let old_process = handle.process.lock().await.replace(new_process);
                if let Some(old_process) = old_process {
                    if let Err(e) = supervisor::terminate(old_process, &self.inner.supervisor_cfg).await {
                        warn!(model = %new_config.name, error = %e, "failed to terminate pre-reload backend");
                    }
                }
                *handle.config.write().await = new_config.clone();
                handle.mark_started(now_unix());
                handle.set_state(ModelState::Ready).await;
                self.inner.status.publish_transition(&new_config.name, ModelState::Reloading, ModelState::Ready);
                handle.queue.drain();
                info!(model = %new_config.name, "reload complete");
                Ok(())
            }
            Err(e) => self.fail_reload(&handle, &new_config).await.and(Err(
                GatewayError::StartFailure { model: new_config.name.clone(), reason: e.to_string() },
            )),
        }
    }

    async fn fail_reload(&self, handle: &Arc<ModelHandle>, config: &ModelConfig) -> Result<(), GatewayError> {
        if let Some(old_process) = handle.process.lock().await.take() {
            let _ = supervisor::terminate(old_process, &self.inner.supervisor_cfg).await;
        }
        handle.set_state(ModelState::Failed).await;
        self.inner.status.publish_transition(&config.name, ModelState::Reloading, ModelState::Failed);
        let err = GatewayError::StartFailure {
            model: config.name.clone(),
            reason: "replacement backend failed to become ready during reload".to_string(),
        };
        handle.queue.fail(err);
        Ok(())
    }

    /// Record a transport failure while forwarding to a READY model;
    /// demotes to FAILED after three consecutive occurrences (§4.5, §9).
    pub async fn record_transport_failure(&self, handle: Arc<ModelHandle>) {
        let streak = handle.record_transport_failure();
        if streak >= TRANSPORT_FAILURE_DEMOTION_THRESHOLD && handle.state().await == ModelState::Ready {
            warn!(streak, "demoting model to FAILED after repeated transport failures");
            let _guard = handle.transition_lock.lock().await;
            if handle.state().await != ModelState::Ready {
                return;
            }
            let config = handle.config.read().await.clone();
            handle.set_state(ModelState::Failed).await;
            self.inner.status.publish_transition(&config.name, ModelState::Ready, ModelState::Failed);
            if let Some(process) = handle.process.lock().await.take() {
                let _ = supervisor::terminate(process, &self.inner.supervisor_cfg).await;
            }
        }
    }

    pub fn status_broadcaster(&self) -> &StatusBroadcaster {
        &self.inner.status
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamagate_core::{Config, GatewaySettings};
    use std::collections::HashMap;

    fn model_config(name: &str, port: u16, priority: u8, preload: bool) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            port,
            model_path: format!("/models/{name}.gguf"),
            context_length: None,
            gpu_layers: None,
            chat_format: None,
            additional_args: vec![],
            priority,
            resource_group: None,
            auto_start: false,
            preload,
            max_queue_size: None,
            request_timeout_secs: None,
        }
    }

    /// A `SupervisorConfig` whose binary cannot possibly spawn, so every
    /// start attempt resolves deterministically to a spawn failure without
    /// needing a real backend.
    fn unspawnable_supervisor_cfg() -> SupervisorConfig {
        SupervisorConfig {
            binary_path: "/nonexistent/llamagate-test-binary-does-not-exist".to_string(),
            ..SupervisorConfig::default()
        }
    }

    fn controller_with(models: Vec<ModelConfig>, max_concurrent: usize) -> (LifecycleController, Arc<Registry>) {
        let mut settings = GatewaySettings::default();
        settings.max_concurrent_models = max_concurrent;
        let map: HashMap<String, ModelConfig> = models.into_iter().map(|m| (m.name.clone(), m)).collect();
        let registry = Arc::new(Registry::new(Config { settings, models: map }));
        let controller = LifecycleController::new(registry.clone(), unspawnable_supervisor_cfg(), StatusBroadcaster::new());
        (controller, registry)
    }

    #[tokio::test]
    async fn start_model_on_ready_is_a_noop() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();
        handle.set_state(ModelState::Ready).await;

        controller.start_model(handle.clone()).await.unwrap();
        assert_eq!(handle.state().await, ModelState::Ready);
    }

    #[tokio::test]
    async fn stop_model_on_stopped_is_a_noop() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();
        assert_eq!(handle.state().await, ModelState::Stopped);

        controller.stop_model(handle.clone()).await.unwrap();
        assert_eq!(handle.state().await, ModelState::Stopped);
    }

    #[tokio::test]
    async fn start_model_demotes_to_failed_when_backend_cannot_spawn() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();

        let err = controller.start_model(handle.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::StartFailure { .. }));
        assert_eq!(handle.state().await, ModelState::Failed);
    }

    #[tokio::test]
    async fn ensure_ready_fails_queued_waiters_when_start_fails() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);

        let err = controller.ensure_ready("m1").await.unwrap_err();
        assert!(matches!(err, GatewayError::StartFailure { .. }));

        let handle = registry.get("m1").await.unwrap();
        assert_eq!(handle.state().await, ModelState::Failed);
    }

    #[tokio::test]
    async fn ensure_ready_unknown_model_is_not_found() {
        let (controller, _registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let err = controller.ensure_ready("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn start_evicts_lowest_priority_ready_model_before_attempting_capacity() {
        let (controller, registry) = controller_with(
            vec![model_config("low", 19001, 1, false), model_config("high", 19002, 9, false)],
            1,
        );
        let victim = registry.get("low").await.unwrap();
        victim.set_state(ModelState::Ready).await;

        // Capacity is full with `low` occupying the single slot; starting
        // `high` must evict it first. The eviction itself always succeeds
        // (no real process is attached), but the subsequent start of `high`
        // still fails since the backend can't spawn.
        let requester = registry.get("high").await.unwrap();
        let err = controller.start_model(requester.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::StartFailure { .. }));

        assert_eq!(victim.state().await, ModelState::Stopped);
        assert_eq!(requester.state().await, ModelState::Failed);
    }

    #[tokio::test]
    async fn start_denies_when_no_eviction_candidate_is_available() {
        let (controller, registry) = controller_with(
            vec![model_config("preloaded", 19001, 1, true), model_config("newcomer", 19002, 9, false)],
            1,
        );
        let occupant = registry.get("preloaded").await.unwrap();
        occupant.set_state(ModelState::Ready).await;

        let requester = registry.get("newcomer").await.unwrap();
        let err = controller.start_model(requester.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AdmissionDenied { .. }));
        assert_eq!(requester.state().await, ModelState::Failed);
        assert_eq!(occupant.state().await, ModelState::Ready);
    }

    #[tokio::test]
    async fn reload_on_non_ready_model_just_applies_the_new_config() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();
        assert_eq!(handle.state().await, ModelState::Stopped);

        let new_config = model_config("m1", 19005, 5, false);
        controller.reload_model(handle.clone(), new_config.clone()).await.unwrap();

        assert_eq!(handle.state().await, ModelState::Stopped);
        assert_eq!(handle.config.read().await.port, 19005);
    }

    #[tokio::test]
    async fn reload_on_ready_model_fails_over_to_failed_when_replacement_cannot_spawn() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();
        handle.set_state(ModelState::Ready).await;

        let new_config = model_config("m1", 19005, 5, false);
        let err = controller.reload_model(handle.clone(), new_config).await.unwrap_err();
        assert!(matches!(err, GatewayError::StartFailure { .. }));
        assert_eq!(handle.state().await, ModelState::Failed);
    }

    #[tokio::test]
    async fn record_transport_failure_demotes_after_threshold() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();
        handle.set_state(ModelState::Ready).await;

        controller.record_transport_failure(handle.clone()).await;
        controller.record_transport_failure(handle.clone()).await;
        assert_eq!(handle.state().await, ModelState::Ready);

        controller.record_transport_failure(handle.clone()).await;
        assert_eq!(handle.state().await, ModelState::Failed);
    }

    #[tokio::test]
    async fn record_transport_failure_does_not_demote_a_stopped_model() {
        let (controller, registry) = controller_with(vec![model_config("m1", 19001, 5, false)], 3);
        let handle = registry.get("m1").await.unwrap();

        for _ in 0..5 {
            controller.record_transport_failure(handle.clone()).await;
        }
        assert_eq!(handle.state().await, ModelState::Stopped);
    }
}
