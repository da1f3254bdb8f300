//! In-process habit store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;

use super::{HabitStore, StoredHabit};
use crate::error::StoreError;
use crate::events::{ChangeFeed, HabitEvent};
use crate::habit::{Habit, HabitPatch};

/// Mutex-guarded map with the same optimistic-version semantics as
/// [`HabitDb`](super::HabitDb).
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredHabit>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredHabit>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn sorted(mut habits: Vec<StoredHabit>) -> Vec<StoredHabit> {
    habits.sort_by(|a, b| {
        a.habit
            .created_at
            .cmp(&b.habit.created_at)
            .then_with(|| a.habit.id.cmp(&b.habit.id))
    });
    habits
}

impl HabitStore for MemoryStore {
    fn insert(&self, habit: &Habit) -> Result<StoredHabit, StoreError> {
        let stored = StoredHabit {
            habit: habit.clone(),
            version: 1,
        };
        {
            let mut records = self.lock()?;
            if records.contains_key(&habit.id) {
                return Err(StoreError::QueryFailed(format!(
                    "habit {} already exists",
                    habit.id
                )));
            }
            records.insert(habit.id.clone(), stored.clone());
        }
        self.feed.publish(HabitEvent::HabitCreated {
            habit_id: habit.id.clone(),
            user_id: habit.user_id.clone(),
            at: Utc::now(),
        });
        Ok(stored)
    }

    fn get(&self, id: &str) -> Result<Option<StoredHabit>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredHabit>, StoreError> {
        let habits = self
            .lock()?
            .values()
            .filter(|s| s.habit.user_id == user_id)
            .cloned()
            .collect();
        Ok(sorted(habits))
    }

    fn list_all(&self) -> Result<Vec<StoredHabit>, StoreError> {
        Ok(sorted(self.lock()?.values().cloned().collect()))
    }

    fn apply(&self, id: &str, expected_version: u64, patch: &HabitPatch) -> Result<u64, StoreError> {
        let (user_id, version) = {
            let mut records = self.lock()?;
            let stored = records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if stored.version != expected_version {
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected: expected_version,
                    actual: stored.version,
                });
            }
            stored.habit.apply_patch(patch);
            stored.version += 1;
            (stored.habit.user_id.clone(), stored.version)
        };
        self.feed.publish(HabitEvent::HabitUpdated {
            habit_id: id.to_string(),
            user_id,
            version,
            at: Utc::now(),
        });
        Ok(version)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.lock()?.remove(id);
        match removed {
            Some(stored) => {
                self.feed.publish(HabitEvent::HabitDeleted {
                    habit_id: id.to_string(),
                    user_id: stored.habit.user_id,
                    at: Utc::now(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn changes(&self) -> broadcast::Receiver<HabitEvent> {
        self.feed.subscribe()
    }
}
