//! Read-compute-write over a [`HabitStore`].
//!
//! Every call site (dashboard listing, user toggle, maintenance) goes
//! through [`HabitService`] so the engine is applied the same way
//! everywhere. Writes carry the version they were computed from; on a
//! conflict the habit is re-read and the patch recomputed, never replayed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{CoreError, Result, StoreError, ValidationError};
use crate::habit::{self, Habit, HabitPatch, NewHabit, StreakState};
use crate::storage::{HabitStore, HabitSubscription, StoredHabit};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Dashboard counters for one user, computed on reconciled habits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitSummary {
    pub total: usize,
    pub completed_today: usize,
    /// Habits with a live streak of at least one day.
    pub active_streaks: usize,
    pub lapsed: usize,
    pub best_streak: u32,
}

impl HabitSummary {
    pub fn from_habits(habits: &[Habit], today: NaiveDate) -> Self {
        let mut summary = HabitSummary {
            total: habits.len(),
            ..Default::default()
        };
        for h in habits {
            if h.completed_today {
                summary.completed_today += 1;
            }
            match h.state(today) {
                StreakState::Active(n) if n > 0 => summary.active_streaks += 1,
                StreakState::Lapsed(_) => summary.lapsed += 1,
                _ => {}
            }
            summary.best_streak = summary.best_streak.max(h.streak);
        }
        summary
    }
}

/// A user's reconciled habits plus any that could not be written back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitListing {
    /// Failed habits appear with their stored, unpatched values.
    pub habits: Vec<Habit>,
    /// Habit ids with the error that stopped their write-back.
    pub failed: Vec<(String, String)>,
}

pub struct HabitService<S, C> {
    store: S,
    clock: C,
    max_retries: u32,
}

impl<S: HabitStore, C: Clock> HabitService<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
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

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Create a fresh habit owned by `user_id`.
    pub fn create(&self, user_id: &str, fields: NewHabit) -> Result<Habit> {
        if fields.name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "name".into(),
                message: "must not be empty".into(),
            }
            .into());
        }
        if user_id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "user_id".into(),
                message: "must not be empty".into(),
            }
            .into());
        }
        let habit = Habit::new(user_id, fields, self.clock.now());
        self.store.insert(&habit)?;
        debug!(habit_id = %habit.id, user_id, "habit created");
        Ok(habit)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if self.store.delete(id)? {
            Ok(())
        } else {
            Err(CoreError::NotFound(id.to_string()))
        }
    }

    /// One habit, reconciled against today and written back if stale.
    pub fn get(&self, id: &str) -> Result<Habit> {
        let (habit, _) = self.update_with_retry(id, habit::reconcile)?;
        Ok(habit)
    }

    /// Reconcile a single habit. Returns the patch that was committed.
    pub fn reconcile_one(&self, id: &str) -> Result<Option<HabitPatch>> {
        let (_, patch) = self.update_with_retry(id, habit::reconcile)?;
        Ok(patch)
    }

    /// Toggle today's completion for a habit.
    ///
    /// The habit is reconciled first so the toggle branches on an
    /// up-to-date `completed_today`; both patches commit as one write.
    pub fn toggle(&self, id: &str) -> Result<Habit> {
        let (habit, _) = self.update_with_retry(id, |h, today| {
            let caught_up = habit::reconcile(h, today);
            let current = match caught_up {
                Some(patch) => h.patched(&patch),
                None => h.clone(),
            };
            let flipped = habit::toggle(&current, today);
            Some(caught_up.unwrap_or_default().merge(flipped))
        })?;
        Ok(habit)
    }

    /// All of a user's habits, reconciled, with stale records written back.
    pub fn habits_for(&self, user_id: &str) -> Result<HabitListing> {
        let snapshot = self.store.list_for_user(user_id)?;
        Ok(self.refresh(snapshot))
    }

    /// Reconcile a snapshot delivered by a subscription.
    ///
    /// Write failures are per habit: the affected habit is listed with its
    /// stored values, its error is recorded in `failed`, and the rest of the
    /// snapshot is unaffected.
    pub fn refresh(&self, snapshot: Vec<StoredHabit>) -> HabitListing {
        let (habits, failures) = self.reconcile_snapshot(snapshot);
        HabitListing {
            habits,
            failed: failures
                .into_iter()
                .map(|(id, e)| (id, e.to_string()))
                .collect(),
        }
    }

    /// Dashboard counters for a user.
    ///
    /// # Errors
    /// Fails with the first write-back error, since counters computed from
    /// unsaved resets would disagree with the store.
    pub fn summary(&self, user_id: &str) -> Result<HabitSummary> {
        let snapshot = self.store.list_for_user(user_id)?;
        let (habits, failures) = self.reconcile_snapshot(snapshot);
        if let Some((_, e)) = failures.into_iter().next() {
            return Err(e);
        }
        Ok(HabitSummary::from_habits(&habits, self.clock.today()))
    }

    fn reconcile_snapshot(&self, snapshot: Vec<StoredHabit>) -> (Vec<Habit>, Vec<(String, CoreError)>) {
        let today = self.clock.today();
        let mut habits = Vec::with_capacity(snapshot.len());
        let mut failures = Vec::new();
        for stored in snapshot {
            let Some(patch) = habit::reconcile(&stored.habit, today) else {
                habits.push(stored.habit);
                continue;
            };
            let written = match self.store.apply(&stored.habit.id, stored.version, &patch) {
                Ok(_) => Ok(stored.habit.patched(&patch)),
                Err(e) if e.is_retryable() => self.get(&stored.habit.id),
                Err(e) => Err(e.into()),
            };
            match written {
                Ok(habit) => habits.push(habit),
                // Deleted concurrently; drop it from the view.
                Err(CoreError::NotFound(_)) | Err(CoreError::Store(StoreError::NotFound(_))) => {}
                Err(e) => {
                    warn!(habit_id = %stored.habit.id, "reconcile write failed: {e}");
                    failures.push((stored.habit.id.clone(), e));
                    habits.push(stored.habit);
                }
            }
        }
        (habits, failures)
    }

    /// Snapshot stream of a user's habits; feed each snapshot to
    /// [`refresh`](Self::refresh).
    pub fn subscribe(&self, user_id: &str) -> HabitSubscription<'_> {
        self.store.subscribe(user_id)
    }

    fn update_with_retry<F>(&self, id: &str, compute: F) -> Result<(Habit, Option<HabitPatch>)>
    where
        F: Fn(&Habit, NaiveDate) -> Option<HabitPatch>,
    {
        let today = self.clock.today();
        let mut conflicts = 0;
        loop {
            let stored = self
                .store
                .get(id)?
                .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
            let Some(patch) = compute(&stored.habit, today) else {
                return Ok((stored.habit, None));
            };
            match self.store.apply(id, stored.version, &patch) {
                Ok(version) => {
                    debug!(habit_id = id, version, ?patch, "habit updated");
                    return Ok((stored.habit.patched(&patch), Some(patch)));
                }
                Err(e) if e.is_retryable() => {
                    conflicts += 1;
                    if conflicts > self.max_retries {
                        warn!(habit_id = id, attempts = conflicts, "giving up after conflicts");
                        return Err(CoreError::RetriesExhausted {
                            id: id.to_string(),
                            attempts: conflicts,
                        });
                    }
                    warn!(habit_id = id, attempt = conflicts, "write conflict, recomputing: {e}");
                }
                Err(StoreError::NotFound(_)) => return Err(CoreError::NotFound(id.to_string())),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::events::HabitEvent;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service(today: NaiveDate) -> HabitService<Arc<MemoryStore>, FixedClock> {
        HabitService::new(Arc::new(MemoryStore::new()), FixedClock(today))
    }

    fn seed(store: &dyn HabitStore, streak: u32, last: Option<NaiveDate>, done: bool) -> Habit {
        let mut h = Habit::new("u1", NewHabit::named("Read"), chrono::Utc::now());
        h.streak = streak;
        h.last_completed = last;
        h.completed_today = done;
        store.insert(&h).unwrap();
        h
    }

    /// Lets another writer slip in before the first `n` applies.
    struct RacingStore {
        inner: MemoryStore,
        races_left: AtomicU32,
        rival: HabitPatch,
    }

    impl HabitStore for RacingStore {
        fn insert(&self, habit: &Habit) -> std::result::Result<StoredHabit, StoreError> {
            self.inner.insert(habit)
        }
        fn get(&self, id: &str) -> std::result::Result<Option<StoredHabit>, StoreError> {
            self.inner.get(id)
        }
        fn list_for_user(&self, user_id: &str) -> std::result::Result<Vec<StoredHabit>, StoreError> {
            self.inner.list_for_user(user_id)
        }
        fn list_all(&self) -> std::result::Result<Vec<StoredHabit>, StoreError> {
            self.inner.list_all()
        }
        fn apply(
            &self,
            id: &str,
            expected_version: u64,
            patch: &HabitPatch,
        ) -> std::result::Result<u64, StoreError> {
            let race = self
                .races_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if race {
                self.inner.apply(id, expected_version, &self.rival)?;
            }
            self.inner.apply(id, expected_version, patch)
        }
        fn delete(&self, id: &str) -> std::result::Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn changes(&self) -> broadcast::Receiver<HabitEvent> {
            self.inner.changes()
        }
    }

    #[test]
    fn create_starts_fresh() {
        let svc = service(date(2024, 3, 10));
        let h = svc.create("u1", NewHabit::named("Meditate")).unwrap();
        assert_eq!(h.streak, 0);
        assert!(!h.completed_today);
        assert!(h.last_completed.is_none());
        let listing = svc.habits_for("u1").unwrap();
        assert_eq!(listing.habits, vec![h]);
        assert!(listing.failed.is_empty());
    }

    #[test]
    fn create_rejects_blank_name() {
        let svc = service(date(2024, 3, 10));
        let err = svc.create("u1", NewHabit::named("  ")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn toggle_completes_and_uncompletes() {
        let today = date(2024, 3, 10);
        let svc = service(today);
        let h = seed(svc.store(), 5, Some(date(2024, 3, 9)), false);

        let done = svc.toggle(&h.id).unwrap();
        assert_eq!(done.streak, 6);
        assert!(done.completed_today);
        assert_eq!(done.last_completed, Some(today));

        let undone = svc.toggle(&h.id).unwrap();
        assert_eq!(undone.streak, 5);
        assert!(!undone.completed_today);
        assert_eq!(undone.last_completed, None);
    }

    #[test]
    fn toggle_reconciles_stale_completed_flag_first() {
        // Completed two days ago and never reconciled since.
        let svc = service(date(2024, 3, 10));
        let h = seed(svc.store(), 4, Some(date(2024, 3, 8)), true);

        let after = svc.toggle(&h.id).unwrap();
        assert!(after.completed_today);
        assert_eq!(after.streak, 1);
        assert_eq!(svc.store().get(&h.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn habits_for_writes_back_resets_once() {
        let svc = service(date(2024, 3, 10));
        let h = seed(svc.store(), 7, Some(date(2024, 3, 6)), false);

        let view = svc.habits_for("u1").unwrap();
        assert_eq!(view.habits[0].streak, 0);
        assert_eq!(svc.store().get(&h.id).unwrap().unwrap().version, 2);

        svc.habits_for("u1").unwrap();
        assert_eq!(svc.store().get(&h.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn toggle_recomputes_after_conflict() {
        let today = date(2024, 3, 10);
        let store = RacingStore {
            inner: MemoryStore::new(),
            races_left: AtomicU32::new(1),
            // A concurrent completion from another device.
            rival: HabitPatch {
                streak: Some(4),
                completed_today: Some(true),
                last_completed: Some(Some(today)),
            },
        };
        let h = seed(&store, 3, Some(date(2024, 3, 9)), false);
        let svc = HabitService::new(store, FixedClock(today));

        // The retry sees the rival's completion and un-completes instead of
        // blindly writing streak 4 on top of it.
        let after = svc.toggle(&h.id).unwrap();
        assert!(!after.completed_today);
        assert_eq!(after.streak, 3);
    }

    #[test]
    fn toggle_gives_up_after_max_retries() {
        let today = date(2024, 3, 10);
        let store = RacingStore {
            inner: MemoryStore::new(),
            races_left: AtomicU32::new(10),
            rival: HabitPatch {
                completed_today: Some(false),
                ..Default::default()
            },
        };
        let h = seed(&store, 0, None, false);
        let svc = HabitService::new(store, FixedClock(today)).with_max_retries(2);

        match svc.toggle(&h.id).unwrap_err() {
            CoreError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[test]
    fn reconcile_one_reports_patch() {
        let svc = service(date(2024, 3, 10));
        let lapsed = seed(svc.store(), 7, Some(date(2024, 3, 6)), false);
        let fine = seed(svc.store(), 2, Some(date(2024, 3, 9)), false);

        let patch = svc.reconcile_one(&lapsed.id).unwrap().unwrap();
        assert_eq!(patch.streak, Some(0));
        assert!(svc.reconcile_one(&lapsed.id).unwrap().is_none());
        assert!(svc.reconcile_one(&fine.id).unwrap().is_none());
    }

    #[test]
    fn missing_habit_is_not_found() {
        let svc = service(date(2024, 3, 10));
        assert!(matches!(svc.toggle("nope"), Err(CoreError::NotFound(_))));
        assert!(matches!(svc.delete("nope"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn summary_counts_reconciled_state() {
        let today = date(2024, 3, 10);
        let svc = service(today);
        seed(svc.store(), 4, Some(today), true);
        seed(svc.store(), 9, Some(date(2024, 3, 9)), false);
        seed(svc.store(), 12, Some(date(2024, 3, 1)), false);
        seed(svc.store(), 0, None, false);

        let summary = svc.summary("u1").unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed_today, 1);
        assert_eq!(summary.active_streaks, 2);
        assert_eq!(summary.lapsed, 1);
        // The lapsed 12 was reset before counting.
        assert_eq!(summary.best_streak, 9);
    }

    #[test]
    fn subscription_feeds_refresh() {
        let svc = service(date(2024, 3, 10));
        let h = seed(svc.store(), 7, Some(date(2024, 3, 6)), false);

        let mut sub = svc.subscribe("u1");
        let first = sub.next_snapshot().unwrap().unwrap();
        let view = svc.refresh(first);
        assert_eq!(view.habits[0].streak, 0);

        // The reset write itself is a change; re-running converges.
        let second = sub.try_next_snapshot().unwrap().unwrap();
        assert_eq!(second[0].version, 2);
        assert_eq!(svc.refresh(second).habits[0].streak, 0);
        assert_eq!(svc.store().get(&h.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn concurrent_toggles_serialize() {
        let today = date(2024, 3, 10);
        let store = Arc::new(MemoryStore::new());
        let h = seed(&store, 0, None, false);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = h.id.clone();
                std::thread::spawn(move || {
                    HabitService::new(store, FixedClock(today))
                        .with_max_retries(64)
                        .toggle(&id)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Eight alternating toggles land back where they started.
        let stored = store.get(&h.id).unwrap().unwrap();
        assert_eq!(stored.version, 9);
        assert_eq!(stored.habit.streak, 0);
        assert!(!stored.habit.completed_today);
    }

    /// Reads work, every write fails.
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    impl HabitStore for ReadOnlyStore {
        fn insert(&self, habit: &Habit) -> std::result::Result<StoredHabit, StoreError> {
            self.inner.insert(habit)
        }
        fn get(&self, id: &str) -> std::result::Result<Option<StoredHabit>, StoreError> {
            self.inner.get(id)
        }
        fn list_for_user(&self, user_id: &str) -> std::result::Result<Vec<StoredHabit>, StoreError> {
            self.inner.list_for_user(user_id)
        }
        fn list_all(&self) -> std::result::Result<Vec<StoredHabit>, StoreError> {
            self.inner.list_all()
        }
        fn apply(&self, _id: &str, _version: u64, _patch: &HabitPatch) -> std::result::Result<u64, StoreError> {
            Err(StoreError::Unavailable("backend offline".into()))
        }
        fn delete(&self, id: &str) -> std::result::Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn changes(&self) -> broadcast::Receiver<HabitEvent> {
            self.inner.changes()
        }
    }

    #[test]
    fn failed_write_back_is_reported_not_hidden() {
        let store = ReadOnlyStore {
            inner: MemoryStore::new(),
        };
        let lapsed = seed(&store, 7, Some(date(2024, 3, 6)), false);
        let healthy = seed(&store, 2, Some(date(2024, 3, 9)), false);
        let svc = HabitService::new(store, FixedClock(date(2024, 3, 10)));

        let listing = svc.habits_for("u1").unwrap();
        assert_eq!(listing.habits.len(), 2);
        assert_eq!(listing.failed.len(), 1);
        assert_eq!(listing.failed[0].0, lapsed.id);
        assert!(listing.failed[0].1.contains("backend offline"));

        // The view matches the store, not the unsaved reset.
        let shown = listing.habits.iter().find(|h| h.id == lapsed.id).unwrap();
        assert_eq!(shown.streak, 7);
        let other = listing.habits.iter().find(|h| h.id == healthy.id).unwrap();
        assert_eq!(other.streak, 2);

        let err = svc.summary("u1").unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Unavailable(_))));
    }
}
