//! `ModelHandle`: the mutable runtime entry for one configured model,
//! bundling its state, process, counters, and queue behind the
//! synchronization primitives the Lifecycle Controller relies on.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use llamagate_core::{ModelConfig, ModelEntrySnapshot, ModelState};
use tokio::sync::{Mutex, RwLock};

use crate::queue::RequestQueue;
use crate::supervisor::RunningProcess;

/// One model's full runtime entry.
///
/// `transition_lock` is the single-consumer serialization point demanded by
/// §4.3/§5: only one state transition for this model may be in flight at a
/// time, enforced by holding the lock for the whole transition, not just the
/// state write.
pub struct ModelHandle {
    pub config: RwLock<ModelConfig>,
    state: RwLock<ModelState>,
    pub transition_lock: Mutex<()>,
    pub process: Mutex<Option<RunningProcess>>,
    pub queue: RequestQueue,
    last_activity_ts: AtomicI64,
    start_ts: AtomicI64,
    request_count: AtomicU64,
    failure_streak: AtomicU32,
}

impl ModelHandle {
    #[must_use]
    pub fn new(config: ModelConfig) -> Arc<Self> {
        let queue = RequestQueue::new(
            config.name.clone(),
            config.effective_max_queue_size(),
            Duration::from_secs(config.effective_request_timeout_secs()),
        );
        Arc::new(Self {
            config: RwLock::new(config),
            state: RwLock::new(ModelState::Stopped),
            transition_lock: Mutex::new(()),
            process: Mutex::new(None),
            queue,
            last_activity_ts: AtomicI64::new(0),
            start_ts: AtomicI64::new(0),
            request_count: AtomicU64::new(0),
            failure_streak: AtomicU32::new(0),
        })
    }

    pub async fn state(&self) -> ModelState {
        *self.state.read().await
    }

    /// Set the state directly. Callers must already hold `transition_lock`
    /// for the duration of the transition this write belongs to.
    pub async fn set_state(&self, new_state: ModelState) {
        let mut guard = self.state.write().await;
        *guard = new_state;
    }

    pub fn touch_activity(&self, now_unix: i64) {
        self.last_activity_ts.store(now_unix, Ordering::Relaxed);
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_activity_ts(&self) -> Option<i64> {
        match self.last_activity_ts.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn mark_started(&self, now_unix: i64) {
        self.start_ts.store(now_unix, Ordering::Relaxed);
        self.failure_streak.store(0, Ordering::Relaxed);
    }

    pub fn mark_stopped(&self) {
        self.start_ts.store(0, Ordering::Relaxed);
    }

    pub fn start_ts(&self) -> Option<i64> {
        match self.start_ts.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Record a transport failure; returns the new streak so callers can
    /// decide whether the three-consecutive-failures threshold was crossed.
    pub fn record_transport_failure(&self) -> u32 {
        self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_failure_streak(&self) {
        self.failure_streak.store(0, Ordering::Relaxed);
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> ModelEntrySnapshot {
        let config = self.config.read().await;
        ModelEntrySnapshot {
            name: config.name.clone(),
            state: self.state().await,
            port: config.port,
            priority: config.priority,
            resource_group: config.resource_group.clone(),
            preload: config.preload,
            last_activity_ts: self.last_activity_ts(),
            start_ts: self.start_ts(),
            request_count: self.request_count(),
            failure_streak: self.failure_streak(),
            queue_depth: self.queue.depth(),
        }
    }
}

/// Three consecutive transport failures on a READY model demote it (§4.5,
/// §9 open question, fixed at 3 for this implementation).
pub const TRANSPORT_FAILURE_DEMOTION_THRESHOLD: u32 = 3;
