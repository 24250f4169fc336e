//! Subscribable status channel.
//!
//! The core's contract to any future UI adapter is only: emit a snapshot no
//! less often than every heartbeat interval, and on every state transition.
//! Nothing in this repository turns these events into WebSocket frames; that
//! adapter lives outside this crate's concern.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ModelEntrySnapshot, ModelState};

/// Default channel capacity; lagging subscribers get a `RecvError::Lagged`
/// and should re-fetch a fresh snapshot rather than replay history.
const CHANNEL_CAPACITY: usize = 256;

/// A single published status event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusEvent {
    /// One model committed a state transition.
    Transition {
        model: String,
        from: ModelState,
        to: ModelState,
    },
    /// A full snapshot of every configured model, emitted on the heartbeat
    /// interval or whenever a subscriber needs to resynchronize.
    Snapshot { models: Vec<ModelEntrySnapshot> },
}

/// Broadcasts `StatusEvent`s to any number of subscribers.
///
/// Cloning is cheap: it shares the same underlying channel.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future events. The subscriber receives nothing retroactively.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publish a transition. Silently drops if there are no subscribers.
    pub fn publish_transition(&self, model: impl Into<String>, from: ModelState, to: ModelState) {
        let _ = self.tx.send(StatusEvent::Transition {
            model: model.into(),
            from,
            to,
        });
    }

    /// Publish a full snapshot.
    pub fn publish_snapshot(&self, models: Vec<ModelEntrySnapshot>) {
        let _ = self.tx.send(StatusEvent::Snapshot { models });
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
