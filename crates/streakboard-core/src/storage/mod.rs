//! Persistence for habits and configuration.
//!
//! [`HabitStore`] is the adapter contract every call site writes through:
//! whole-record reads carry a version, and [`HabitStore::apply`] only
//! commits a patch if that version is still current.

mod config;
pub mod habit_db;
pub mod memory;
pub mod migrations;

pub use config::{ClockConfig, Config, EngineConfig, LogConfig, UserConfig};
pub use habit_db::HabitDb;
pub use memory::MemoryStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::error::StoreError;
use crate::events::HabitEvent;
use crate::habit::{Habit, HabitPatch};

/// Returns `~/.config/streakboard[-dev]/` based on STREAKBOARD_ENV.
///
/// Set STREAKBOARD_ENV=dev to use development data directory, or
/// STREAKBOARD_HOME to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("STREAKBOARD_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STREAKBOARD_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("streakboard-dev")
            } else {
                base_dir.join("streakboard")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// A habit as read from a store, with the version its next write must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHabit {
    #[serde(flatten)]
    pub habit: Habit,
    pub version: u64,
}

/// Persistence adapter contract.
pub trait HabitStore: Send + Sync {
    /// Persist a new habit at version 1.
    fn insert(&self, habit: &Habit) -> Result<StoredHabit, StoreError>;

    fn get(&self, id: &str) -> Result<Option<StoredHabit>, StoreError>;

    fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredHabit>, StoreError>;

    fn list_all(&self) -> Result<Vec<StoredHabit>, StoreError>;

    /// Write `patch` only if the record is still at `expected_version`.
    ///
    /// Returns the new version. A stale version yields
    /// [`StoreError::Conflict`]; the caller must re-read and recompute.
    fn apply(&self, id: &str, expected_version: u64, patch: &HabitPatch) -> Result<u64, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Raw change events for every user.
    fn changes(&self) -> broadcast::Receiver<HabitEvent>;

    /// Snapshot stream of one user's habits.
    fn subscribe(&self, user_id: &str) -> HabitSubscription<'_>
    where
        Self: Sized,
    {
        HabitSubscription::new(self, user_id)
    }
}

impl<T: HabitStore + ?Sized> HabitStore for std::sync::Arc<T> {
    fn insert(&self, habit: &Habit) -> Result<StoredHabit, StoreError> {
        (**self).insert(habit)
    }

    fn get(&self, id: &str) -> Result<Option<StoredHabit>, StoreError> {
        (**self).get(id)
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredHabit>, StoreError> {
        (**self).list_for_user(user_id)
    }

    fn list_all(&self) -> Result<Vec<StoredHabit>, StoreError> {
        (**self).list_all()
    }

    fn apply(&self, id: &str, expected_version: u64, patch: &HabitPatch) -> Result<u64, StoreError> {
        (**self).apply(id, expected_version, patch)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn changes(&self) -> broadcast::Receiver<HabitEvent> {
        (**self).changes()
    }
}

/// Stream of snapshots of one user's habits.
///
/// The first call yields the current snapshot; each later call yields a
/// fresh snapshot once a change for that user has been committed.
pub struct HabitSubscription<'a> {
    store: &'a dyn HabitStore,
    user_id: String,
    rx: broadcast::Receiver<HabitEvent>,
    primed: bool,
}

impl<'a> HabitSubscription<'a> {
    pub fn new(store: &'a dyn HabitStore, user_id: &str) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            rx: store.changes(),
            primed: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Block until the next snapshot. `Ok(None)` once the store is gone.
    pub fn next_snapshot(&mut self) -> Result<Option<Vec<StoredHabit>>, StoreError> {
        if !self.primed {
            self.primed = true;
            return self.snapshot().map(Some);
        }
        loop {
            match self.rx.blocking_recv() {
                Ok(event) if event.user_id() == self.user_id => {
                    self.drain();
                    return self.snapshot().map(Some);
                }
                Ok(_) => continue,
                // Missed events may include ours; re-read to resynchronise.
                Err(RecvError::Lagged(_)) => return self.snapshot().map(Some),
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    /// Non-blocking variant: `Ok(None)` when nothing relevant changed.
    pub fn try_next_snapshot(&mut self) -> Result<Option<Vec<StoredHabit>>, StoreError> {
        if !self.primed {
            self.primed = true;
            return self.snapshot().map(Some);
        }
        if self.drain() {
            self.snapshot().map(Some)
        } else {
            Ok(None)
        }
    }

    // Consume pending events; true if any concerned this user.
    fn drain(&mut self) -> bool {
        let mut relevant = false;
        loop {
            match self.rx.try_recv() {
                Ok(event) => relevant |= event.user_id() == self.user_id,
                Err(TryRecvError::Lagged(_)) => relevant = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return relevant,
            }
        }
    }

    fn snapshot(&self) -> Result<Vec<StoredHabit>, StoreError> {
        self.store.list_for_user(&self.user_id)
    }
}
