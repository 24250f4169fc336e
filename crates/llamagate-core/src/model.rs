//! Domain types for a single configured model: its immutable configuration
//! and the serializable snapshot of its mutable runtime entry.

use serde::{Deserialize, Serialize};

/// Default queue capacity when a model doesn't override it.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default per-request queue timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default priority assigned to a model when unset.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Immutable per-model configuration, as loaded from one configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Unique key; also used as the OpenAI-compatible `model` identifier.
    pub name: String,
    /// Loopback TCP port owned exclusively by this model's backend.
    pub port: u16,
    /// Path to the GGUF (or similar) model weights file.
    pub model_path: String,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    #[serde(default)]
    pub chat_format: Option<String>,
    /// Ordered list of opaque launch flags, tokenized or space-joined.
    #[serde(default)]
    pub additional_args: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub preload: bool,
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

const fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl ModelConfig {
    /// Splits any space-joined entries in `additional_args` on whitespace,
    /// per the configuration loader's tokenization rule.
    #[must_use]
    pub fn tokenized_args(&self) -> Vec<String> {
        self.additional_args
            .iter()
            .flat_map(|arg| arg.split_whitespace().map(str::to_string))
            .collect()
    }

    #[must_use]
    pub fn effective_max_queue_size(&self) -> usize {
        self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE)
    }

    #[must_use]
    pub fn effective_request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    /// Whether changing from `self` to `other` requires a respawn (port, path
    /// or launch args changed) rather than an in-place metadata update.
    #[must_use]
    pub fn requires_respawn(&self, other: &Self) -> bool {
        self.port != other.port
            || self.model_path != other.model_path
            || self.additional_args != other.additional_args
            || self.gpu_layers != other.gpu_layers
            || self.context_length != other.context_length
    }
}

/// The state a `ModelEntry` can be in; mirrors the lifecycle transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Stopped,
    Starting,
    Ready,
    Stopping,
    Reloading,
    Failed,
}

impl ModelState {
    /// States that count against the global concurrency cap.
    #[must_use]
    pub const fn counts_toward_admission(self) -> bool {
        matches!(self, Self::Starting | Self::Ready | Self::Reloading)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Reloading => "reloading",
            Self::Failed => "failed",
        }
    }
}

/// A read-only, point-in-time copy of one model's runtime entry. Safe to
/// hand out to status views and admin handlers without holding any lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntrySnapshot {
    pub name: String,
    pub state: ModelState,
    pub port: u16,
    pub priority: u8,
    pub resource_group: Option<String>,
    pub preload: bool,
    /// Unix timestamp (seconds) of the last successfully routed request.
    pub last_activity_ts: Option<i64>,
    /// Unix timestamp (seconds) the current process was started.
    pub start_ts: Option<i64>,
    pub request_count: u64,
    pub failure_streak: u32,
    pub queue_depth: usize,
}

impl ModelEntrySnapshot {
    #[must_use]
    pub fn uptime_secs(&self, now: i64) -> Option<i64> {
        self.start_ts.map(|start| (now - start).max(0))
    }
}
