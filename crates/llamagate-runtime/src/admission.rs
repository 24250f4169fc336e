//! Global concurrency admission (§4.3, §5).
//!
//! The concurrent-models counter is never stored independently — it is
//! always derived by scanning the Registry's current snapshot, which means
//! there is nothing to get out of sync. What does need protecting is the
//! window between "count capacity" and "commit to STARTING": the global
//! admission lock closes that window so two concurrent start-requests can
//! never both observe available capacity.

use llamagate_core::ModelEntrySnapshot;
use tokio::sync::{Mutex, MutexGuard};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Capacity is available; proceed straight to STARTING.
    Admit,
    /// No capacity, but `victim` is a valid eviction target.
    Evict { victim: String },
    /// No capacity and nothing evictable.
    Deny,
}

/// Serializes admission decisions process-wide.
pub struct AdmissionController {
    lock: Mutex<()>,
}

impl AdmissionController {
    #[must_use]
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Acquire the global admission lock and decide what `requesting_model`
    /// should do. The caller must hold the returned guard until the
    /// resulting STARTING transition (and any eviction) has committed.
    pub async fn admit(
        &self,
        snapshots: &[ModelEntrySnapshot],
        requesting_model: &str,
        max_concurrent: usize,
    ) -> (MutexGuard<'_, ()>, AdmissionDecision) {
        let guard = self.lock.lock().await;

        let active = snapshots
            .iter()
            .filter(|s| s.name != requesting_model && s.state.counts_toward_admission())
            .count();

        if active < max_concurrent {
            return (guard, AdmissionDecision::Admit);
        }

        let victim = snapshots
            .iter()
            .filter(|s| {
                s.name != requesting_model
                    && !s.preload
                    && s.state == llamagate_core::ModelState::Ready
            })
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.last_activity_ts.cmp(&b.last_activity_ts))
            })
            .map(|s| s.name.clone());

        match victim {
            Some(name) => (guard, AdmissionDecision::Evict { victim: name }),
            None => (guard, AdmissionDecision::Deny),
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamagate_core::ModelState;

    fn snapshot(name: &str, state: ModelState, priority: u8, preload: bool, last_activity: Option<i64>) -> ModelEntrySnapshot {
        ModelEntrySnapshot {
            name: name.to_string(),
            state,
            port: 0,
            priority,
            resource_group: None,
            preload,
            last_activity_ts: last_activity,
            start_ts: None,
            request_count: 0,
            failure_streak: 0,
            queue_depth: 0,
        }
    }

    #[tokio::test]
    async fn admits_when_under_capacity() {
        let admission = AdmissionController::new();
        let snaps = vec![snapshot("m1", ModelState::Stopped, 5, false, None)];
        let (_guard, decision) = admission.admit(&snaps, "m1", 3).await;
        assert_eq!(decision, AdmissionDecision::Admit);
    }

    #[tokio::test]
    async fn evicts_lowest_priority_ready_model() {
        let admission = AdmissionController::new();
        let snaps = vec![
            snapshot("m1", ModelState::Ready, 3, false, Some(100)),
            snapshot("m2", ModelState::Ready, 7, false, Some(200)),
        ];
        let (_guard, decision) = admission.admit(&snaps, "m3", 2).await;
        assert_eq!(decision, AdmissionDecision::Evict { victim: "m1".into() });
    }

    #[tokio::test]
    async fn never_evicts_preloaded_models() {
        let admission = AdmissionController::new();
        let snaps = vec![snapshot("m1", ModelState::Ready, 1, true, Some(1))];
        let (_guard, decision) = admission.admit(&snaps, "m2", 1).await;
        assert_eq!(decision, AdmissionDecision::Deny);
    }

    #[tokio::test]
    async fn tie_break_by_oldest_activity() {
        let admission = AdmissionController::new();
        let snaps = vec![
            snapshot("m1", ModelState::Ready, 5, false, Some(500)),
            snapshot("m2", ModelState::Ready, 5, false, Some(100)),
        ];
        let (_guard, decision) = admission.admit(&snaps, "m3", 2).await;
        assert_eq!(decision, AdmissionDecision::Evict { victim: "m2".into() });
    }
}
