pub mod admission;
pub mod controller;
pub mod handle;
pub mod log_tail;
pub mod ports_check;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod supervisor;

pub use admission::{AdmissionController, AdmissionDecision};
pub use controller::LifecycleController;
pub use handle::{ModelHandle, TRANSPORT_FAILURE_DEMOTION_THRESHOLD};
pub use log_tail::LogTail;
pub use ports_check::find_occupied_ports;
pub use queue::{QueueOutcome, RequestQueue};
pub use reaper::{DEFAULT_STATUS_HEARTBEAT_INTERVAL, spawn_idle_reaper, spawn_status_heartbeat};
pub use registry::Registry;
pub use supervisor::{RunningProcess, SupervisorConfig, SupervisorError};

use std::sync::Arc;
use std::time::Duration;

use llamagate_core::{Config, ModelConfig, ModelState, ReloadDiff, StatusBroadcaster};

/// Bundles the pieces a composition root needs: the Registry, the
/// Lifecycle Controller, and the status channel they share.
pub struct Runtime {
    pub registry: Arc<Registry>,
    pub controller: LifecycleController,
    pub status: StatusBroadcaster,
}

impl Runtime {
    #[must_use]
    pub fn new(config: Config, supervisor_cfg: SupervisorConfig) -> Self {
        let registry = Arc::new(Registry::new(config));
        let status = StatusBroadcaster::new();
        let controller = LifecycleController::new(registry.clone(), supervisor_cfg, status.clone());
        Self {
            registry,
            controller,
            status,
        }
    }

    /// Start the idle reaper on the configured interval.
    pub fn spawn_reaper(&self, cleanup_interval: Duration, idle_timeout_secs: u64) -> tokio::task::JoinHandle<()> {
        spawn_idle_reaper(self.controller.clone(), cleanup_interval, idle_timeout_secs)
    }

    /// Start the Status Channel's fixed-interval heartbeat.
    pub fn spawn_status_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        spawn_status_heartbeat(self.controller.clone(), DEFAULT_STATUS_HEARTBEAT_INTERVAL)
    }

    /// Auto-start models on boot, highest priority first, respecting the
    /// global cap and each model's `auto_start`/`preload` flags (§4.3).
    ///
    /// Preloaded models are queued for start regardless of `on_demand_only`;
    /// everything else only starts eagerly when `on_demand_only` is false
    /// and the model is marked `auto_start`.
    pub async fn auto_start_on_boot(&self, on_demand_only: bool) {
        let mut configs: Vec<ModelConfig> = self.registry.list_configs().await;
        configs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

        for config in configs {
            let should_start = config.preload || (!on_demand_only && config.auto_start);
            if !should_start {
                continue;
            }
            if let Some(handle) = self.registry.get(&config.name).await {
                if handle.state().await == ModelState::Stopped {
                    let controller = self.controller.clone();
                    tokio::spawn(async move {
                        let _ = controller.start_model(handle).await;
                    });
                }
            }
        }
    }

    /// Apply a freshly-parsed configuration snapshot: diff it against the
    /// currently-held one, stop whatever must stop before the bookkeeping
    /// swap, apply the swap, then bring back up whatever the diff calls for
    /// (§6 "Reload semantics").
    ///
    /// Removed entries and respawn targets are stopped through the
    /// controller *before* `Registry::apply_reload` swaps in the new
    /// config, matching the Registry's own documented contract that the
    /// caller stops the old entry first. Respawn targets are only
    /// restarted afterward if they were actually READY beforehand, or are
    /// `preload`; a respawn target that was already STOPPED stays stopped.
    pub async fn reload(&self, new_config: Config) -> ReloadDiff {
        let diff = self.registry.diff_against_current(&new_config).await;
        if diff.is_noop() {
            return diff;
        }

        let mut was_ready = std::collections::HashSet::new();
        for model in &diff.respawn {
            if let Some(handle) = self.registry.get(&model.name).await {
                if handle.state().await == ModelState::Ready {
                    was_ready.insert(model.name.clone());
                }
                let _ = self.controller.stop_model(handle).await;
            }
        }
        for name in &diff.removed {
            if let Some(handle) = self.registry.get(name).await {
                let _ = self.controller.stop_model(handle).await;
            }
        }

        self.registry.apply_reload(new_config, &diff).await;

        for model in &diff.added {
            if model.preload || model.auto_start {
                self.trigger_background_start(&model.name);
            }
        }
        for model in &diff.respawn {
            if model.preload || was_ready.contains(&model.name) {
                self.trigger_background_start(&model.name);
            }
        }

        diff
    }

    fn trigger_background_start(&self, name: &str) {
        let controller = self.controller.clone();
        let registry = self.registry.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            if let Some(handle) = registry.get(&name).await {
                let _ = controller.start_model(handle).await;
            }
        });
    }
}
