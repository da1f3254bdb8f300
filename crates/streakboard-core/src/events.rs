use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every committed change to a habit record produces an Event.
/// Subscriptions filter them by owner and re-read the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HabitEvent {
    HabitCreated {
        habit_id: String,
        user_id: String,
        at: DateTime<Utc>,
    },
    HabitUpdated {
        habit_id: String,
        user_id: String,
        version: u64,
        at: DateTime<Utc>,
    },
    HabitDeleted {
        habit_id: String,
        user_id: String,
        at: DateTime<Utc>,
    },
}

impl HabitEvent {
    pub fn habit_id(&self) -> &str {
        match self {
            HabitEvent::HabitCreated { habit_id, .. }
            | HabitEvent::HabitUpdated { habit_id, .. }
            | HabitEvent::HabitDeleted { habit_id, .. } => habit_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            HabitEvent::HabitCreated { user_id, .. }
            | HabitEvent::HabitUpdated { user_id, .. }
            | HabitEvent::HabitDeleted { user_id, .. } => user_id,
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`HabitEvent`]s to any number of receivers.
///
/// Publishing never blocks; slow receivers observe a lag instead.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<HabitEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: HabitEvent) {
        // No receivers is the common case for one-shot CLI runs.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HabitEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
