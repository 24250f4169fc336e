//! Model Registry (§4.2): the configuration snapshot and the map from model
//! name to its runtime entry. Read views hand out snapshots, never locks.

use std::collections::HashMap;
use std::sync::Arc;

use llamagate_core::{Config, ModelConfig, ModelEntrySnapshot, ReloadDiff};
use tokio::sync::RwLock;

use crate::handle::ModelHandle;

/// Owns every configured model's runtime entry.
pub struct Registry {
    config: RwLock<Config>,
    entries: RwLock<HashMap<String, Arc<ModelHandle>>>,
}

impl Registry {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let entries = config
            .models
            .values()
            .map(|cfg| (cfg.name.clone(), ModelHandle::new(cfg.clone())))
            .collect();
        Self {
            config: RwLock::new(config),
            entries: RwLock::new(entries),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ModelHandle>> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn list_names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn list_configs(&self) -> Vec<ModelConfig> {
        self.config.read().await.models.values().cloned().collect()
    }

    pub async fn get_config(&self, name: &str) -> Option<ModelConfig> {
        self.config.read().await.models.get(name).cloned()
    }

    pub async fn resource_group(&self, group: &str) -> Vec<Arc<ModelHandle>> {
        let config = self.config.read().await;
        let entries = self.entries.read().await;
        config
            .models
            .values()
            .filter(|m| m.resource_group.as_deref() == Some(group))
            .filter_map(|m| entries.get(&m.name).cloned())
            .collect()
    }

    /// Snapshot of every model's current runtime entry; used by status views
    /// and the heartbeat broadcaster. Never holds a lock across awaits in
    /// the caller beyond this single call.
    pub async fn snapshot_all(&self) -> Vec<ModelEntrySnapshot> {
        let handles: Vec<Arc<ModelHandle>> = self.entries.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub async fn current_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Compute the reload diff against the currently-held snapshot, without
    /// applying it — the Lifecycle Controller decides how and when to apply.
    pub async fn diff_against_current(&self, new_config: &Config) -> ReloadDiff {
        let current = self.config.read().await;
        new_config.diff(&current)
    }

    /// Apply a reload: insert new entries, update in-place configs, and drop
    /// removed entries. Respawn targets are handled by the caller (the
    /// Lifecycle Controller), which must stop the old entry first; this only
    /// swaps bookkeeping once that's done.
    pub async fn apply_reload(&self, new_config: Config, diff: &ReloadDiff) {
        let mut entries = self.entries.write().await;

        for model in &diff.added {
            entries.insert(model.name.clone(), ModelHandle::new(model.clone()));
        }

        for name in &diff.removed {
            entries.remove(name);
        }

        for model in diff.updated_in_place.iter().chain(diff.respawn.iter()) {
            if let Some(handle) = entries.get(&model.name) {
                let mut cfg = handle.config.write().await;
                *cfg = model.clone();
            }
        }

        *self.config.write().await = new_config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn config_with(models: Vec<(&str, u16)>) -> Config {
        let mut map = StdHashMap::new();
        for (name, port) in models {
            map.insert(
                name.to_string(),
                ModelConfig {
                    name: name.to_string(),
                    port,
                    model_path: format!("/models/{name}.gguf"),
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
        }
        Config {
            settings: llamagate_core::GatewaySettings::default(),
            models: map,
        }
    }

    #[tokio::test]
    async fn get_returns_configured_entry() {
        let registry = Registry::new(config_with(vec![("m1", 19001)]));
        assert!(registry.get("m1").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_all_is_sorted_by_name() {
        let registry = Registry::new(config_with(vec![("zeta", 19002), ("alpha", 19001)]));
        let snaps = registry.snapshot_all().await;
        assert_eq!(snaps[0].name, "alpha");
        assert_eq!(snaps[1].name, "zeta");
    }

    #[tokio::test]
    async fn apply_reload_adds_and_removes_entries() {
        let registry = Registry::new(config_with(vec![("m1", 19001)]));
        let new_config = config_with(vec![("m2", 19002)]);
        let diff = registry.diff_against_current(&new_config).await;
        registry.apply_reload(new_config, &diff).await;

        assert!(registry.get("m1").await.is_none());
        assert!(registry.get("m2").await.is_some());
    }
}
