//! Bulk reconcile job.
//!
//! Walks every habit in the store, independent of any user session, and
//! writes back whatever [`reconcile`](crate::habit::reconcile) proposes.
//! One habit failing never stops the scan.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result, StoreError};
use crate::habit::{self, HabitPatch};
use crate::service::DEFAULT_MAX_RETRIES;
use crate::storage::{HabitStore, StoredHabit};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub today: NaiveDate,
    pub scanned: usize,
    /// Habits whose streak was broken and reset to zero.
    pub reset: usize,
    /// Habits patched without a reset (only `completed_today` changed).
    pub updated: usize,
    pub unchanged: usize,
    /// Habits deleted between the scan and their write.
    pub vanished: usize,
    /// Conflicting writes that were recomputed.
    pub conflicts: usize,
    /// Habit ids with the error that stopped them.
    pub failed: Vec<(String, String)>,
}

pub struct MaintenanceJob<S> {
    store: S,
    max_retries: u32,
}

enum Outcome {
    Unchanged,
    Patched(HabitPatch),
    Vanished,
}

impl<S: HabitStore> MaintenanceJob<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile every habit as of `today`.
    ///
    /// # Errors
    /// Only if the initial scan cannot be read; per-habit failures are
    /// collected in the report.
    pub fn run(&self, today: NaiveDate) -> Result<MaintenanceReport> {
        let habits = self.store.list_all()?;
        let mut report = MaintenanceReport {
            today,
            scanned: habits.len(),
            reset: 0,
            updated: 0,
            unchanged: 0,
            vanished: 0,
            conflicts: 0,
            failed: Vec::new(),
        };

        for stored in habits {
            let id = stored.habit.id.clone();
            match self.reconcile_stored(stored, today, &mut report.conflicts) {
                Ok(Outcome::Patched(patch)) if patch.streak == Some(0) => {
                    info!(habit_id = %id, "streak lapsed, reset to 0");
                    report.reset += 1;
                }
                Ok(Outcome::Patched(_)) => report.updated += 1,
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Ok(Outcome::Vanished) => report.vanished += 1,
                Err(e) => {
                    warn!(habit_id = %id, "maintenance failed: {e}");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            %today,
            scanned = report.scanned,
            reset = report.reset,
            updated = report.updated,
            conflicts = report.conflicts,
            failed = report.failed.len(),
            "maintenance pass complete"
        );
        Ok(report)
    }

    fn reconcile_stored(
        &self,
        mut stored: StoredHabit,
        today: NaiveDate,
        conflicts: &mut usize,
    ) -> Result<Outcome> {
        let mut attempts = 0;
        loop {
            let Some(patch) = habit::reconcile(&stored.habit, today) else {
                return Ok(Outcome::Unchanged);
            };
            match self.store.apply(&stored.habit.id, stored.version, &patch) {
                Ok(_) => return Ok(Outcome::Patched(patch)),
                Err(e) if e.is_retryable() => {
                    *conflicts += 1;
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(CoreError::RetriesExhausted {
                            id: stored.habit.id,
                            attempts,
                        });
                    }
                    match self.store.get(&stored.habit.id)? {
                        Some(fresh) => stored = fresh,
                        None => return Ok(Outcome::Vanished),
                    }
                }
                Err(StoreError::NotFound(_)) => return Ok(Outcome::Vanished),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
