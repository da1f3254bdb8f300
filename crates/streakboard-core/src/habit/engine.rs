//! Streak engine.
//!
//! Two pure operations over a habit snapshot and a caller-supplied `today`:
//! [`reconcile`] catches the record up after days pass without interaction,
//! [`toggle`] applies a user completion toggle. Neither reads the clock nor
//! fails; malformed input (a completion dated after `today`) is a no-op.

use chrono::{Days, NaiveDate};
use tracing::debug;

use super::{Habit, HabitPatch};

/// Whole calendar days from `last_day` to `today`, clamped at zero.
pub fn gap_days(last_day: NaiveDate, today: NaiveDate) -> i64 {
    (today - last_day).num_days().max(0)
}

/// Recompute `completed_today` and break lapsed streaks.
///
/// Returns `None` when the persisted record is already consistent with
/// `today`, so calling this on every read produces no redundant writes.
pub fn reconcile(habit: &Habit, today: NaiveDate) -> Option<HabitPatch> {
    let last_day = habit.last_completed?;
    if last_day > today {
        return None;
    }

    let gap = gap_days(last_day, today);
    let completed_today = gap == 0;

    let mut patch = HabitPatch::default();
    if completed_today != habit.completed_today {
        patch.completed_today = Some(completed_today);
    }
    // gap == 1 keeps the streak alive until the end of today.
    if !completed_today && gap > 1 && habit.streak != 0 {
        patch.streak = Some(0);
    }

    let patch = patch.non_empty()?;
    debug!(habit_id = %habit.id, gap, ?patch, "reconcile produced patch");
    Some(patch)
}

/// Flip today's completion and update the streak.
///
/// Callers reconcile first; the branch is chosen from the snapshot's
/// `completed_today` as given.
pub fn toggle(habit: &Habit, today: NaiveDate) -> HabitPatch {
    let patch = if habit.completed_today {
        HabitPatch {
            streak: Some(habit.streak.saturating_sub(1)),
            completed_today: Some(false),
            last_completed: Some(None),
        }
    } else {
        HabitPatch {
            streak: Some(completed_streak(habit, today)),
            completed_today: Some(true),
            last_completed: Some(Some(today)),
        }
    };
    debug!(habit_id = %habit.id, ?patch, "toggle");
    patch
}

fn completed_streak(habit: &Habit, today: NaiveDate) -> u32 {
    let yesterday = today.checked_sub_days(Days::new(1));
    match habit.last_completed {
        None => habit.streak.saturating_add(1),
        Some(last_day) if Some(last_day) == yesterday => habit.streak.saturating_add(1),
        Some(last_day) if last_day < today => 1,
        // Same-day re-completion, or a completion dated in the future.
        Some(_) => habit.streak.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::NewHabit;
    use chrono::Utc;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn habit(streak: u32, last_completed: Option<NaiveDate>, completed_today: bool) -> Habit {
        let mut h = Habit::new("user-1", NewHabit::named("Stretch"), Utc::now());
        h.streak = streak;
        h.last_completed = last_completed;
        h.completed_today = completed_today;
        h
    }

    #[test]
    fn reconcile_fresh_habit_is_noop() {
        let h = habit(0, None, false);
        assert_eq!(reconcile(&h, date(2024, 3, 10)), None);
    }

    #[test]
    fn reconcile_yesterday_is_not_a_break() {
        let h = habit(3, Some(date(2024, 3, 9)), false);
        assert_eq!(reconcile(&h, date(2024, 3, 10)), None);
    }

    #[test]
    fn reconcile_clears_completed_today_from_yesterday() {
        let h = habit(3, Some(date(2024, 3, 9)), true);
        let patch = reconcile(&h, date(2024, 3, 10)).unwrap();
        assert_eq!(patch.completed_today, Some(false));
        assert_eq!(patch.streak, None);
        assert_eq!(patch.last_completed, None);
    }

    #[test]
    fn reconcile_breaks_after_two_days() {
        let h = habit(7, Some(date(2024, 3, 8)), false);
        let patch = reconcile(&h, date(2024, 3, 10)).unwrap();
        assert_eq!(patch.streak, Some(0));
        assert_eq!(patch.completed_today, None);
    }

    #[test]
    fn reconcile_break_with_stale_completed_flag() {
        let h = habit(7, Some(date(2024, 3, 6)), true);
        let patch = reconcile(&h, date(2024, 3, 10)).unwrap();
        assert_eq!(patch.streak, Some(0));
        assert_eq!(patch.completed_today, Some(false));
    }

    #[test]
    fn reconcile_marks_completed_today() {
        let h = habit(2, Some(date(2024, 3, 10)), false);
        let patch = reconcile(&h, date(2024, 3, 10)).unwrap();
        assert_eq!(patch.completed_today, Some(true));
        assert_eq!(patch.streak, None);
    }

    #[test]
    fn reconcile_future_completion_is_noop() {
        let h = habit(2, Some(date(2024, 3, 12)), false);
        assert_eq!(reconcile(&h, date(2024, 3, 10)), None);
    }

    #[test]
    fn reconcile_lapsed_zero_streak_is_noop() {
        let h = habit(0, Some(date(2024, 3, 1)), false);
        assert_eq!(reconcile(&h, date(2024, 3, 10)), None);
    }

    #[test]
    fn toggle_continues_chain_from_yesterday() {
        let today = date(2024, 3, 10);
        let h = habit(5, Some(date(2024, 3, 9)), false);
        let patch = toggle(&h, today);
        assert_eq!(patch.streak, Some(6));
        assert_eq!(patch.completed_today, Some(true));
        assert_eq!(patch.last_completed, Some(Some(today)));
    }

    #[test]
    fn toggle_restarts_after_lapse() {
        let today = date(2024, 3, 10);
        let h = habit(5, Some(date(2024, 3, 7)), false);
        assert_eq!(toggle(&h, today).streak, Some(1));
    }

    #[test]
    fn toggle_first_completion() {
        let h = habit(0, None, false);
        assert_eq!(toggle(&h, date(2024, 3, 10)).streak, Some(1));
    }

    #[test]
    fn toggle_same_day_recompletion_keeps_at_least_one() {
        let today = date(2024, 3, 10);
        assert_eq!(toggle(&habit(0, Some(today), false), today).streak, Some(1));
        assert_eq!(toggle(&habit(4, Some(today), false), today).streak, Some(4));
    }

    #[test]
    fn toggle_with_future_completion_keeps_at_least_one() {
        let today = date(2024, 3, 10);
        let future = Some(date(2024, 3, 14));
        assert_eq!(toggle(&habit(0, future, false), today).streak, Some(1));

        let patch = toggle(&habit(6, future, false), today);
        assert_eq!(patch.streak, Some(6));
        assert_eq!(patch.completed_today, Some(true));
        assert_eq!(patch.last_completed, Some(Some(today)));
    }

    #[test]
    fn uncomplete_decrements_and_clears_last_completed() {
        let today = date(2024, 3, 10);
        let patch = toggle(&habit(4, Some(today), true), today);
        assert_eq!(patch.streak, Some(3));
        assert_eq!(patch.completed_today, Some(false));
        assert_eq!(patch.last_completed, Some(None));
    }

    #[test]
    fn uncomplete_floors_at_zero() {
        let today = date(2024, 3, 10);
        let patch = toggle(&habit(0, Some(today), true), today);
        assert_eq!(patch.streak, Some(0));
    }

    #[test]
    fn complete_then_uncomplete_returns_fresh_habit_to_zero() {
        let today = date(2024, 3, 10);
        let fresh = habit(0, None, false);
        let done = fresh.patched(&toggle(&fresh, today));
        assert_eq!(done.streak, 1);
        assert!(done.completed_today);

        let undone = done.patched(&toggle(&done, today));
        assert_eq!(undone.streak, 0);
        assert!(!undone.completed_today);
        assert!(undone.last_completed.is_none());
    }

    #[test]
    fn concrete_scenario() {
        let today = date(2024, 3, 10);

        let a = habit(3, Some(date(2024, 3, 9)), false);
        assert_eq!(reconcile(&a, today), None);
        assert_eq!(
            toggle(&a, today),
            HabitPatch {
                streak: Some(4),
                completed_today: Some(true),
                last_completed: Some(Some(today)),
            }
        );

        let b = habit(7, Some(date(2024, 3, 6)), false);
        let patch = reconcile(&b, today).unwrap();
        let reset = b.patched(&patch);
        assert_eq!(reset.streak, 0);
        assert!(!reset.completed_today);
    }

    fn arb_habit() -> impl Strategy<Value = (Habit, NaiveDate)> {
        (0u32..500, proptest::option::of(0i64..30), any::<bool>()).prop_map(
            |(streak, days_ago, completed_today)| {
                let today = date(2024, 3, 10);
                let last = days_ago.map(|d| today - chrono::Duration::days(d));
                (habit(streak, last, completed_today), today)
            },
        )
    }

    proptest! {
        #[test]
        fn reconcile_is_idempotent((h, today) in arb_habit()) {
            let once = match reconcile(&h, today) {
                Some(patch) => h.patched(&patch),
                None => h.clone(),
            };
            prop_assert_eq!(reconcile(&once, today), None);
        }

        #[test]
        fn reconcile_only_breaks_on_gaps_of_two_or_more((h, today) in arb_habit()) {
            if let Some(patch) = reconcile(&h, today) {
                if patch.streak == Some(0) {
                    let gap = gap_days(h.last_completed.unwrap(), today);
                    prop_assert!(gap >= 2);
                }
                prop_assert_eq!(patch.last_completed, None);
            }
        }

        #[test]
        fn reconciled_completion_matches_last_day((h, today) in arb_habit()) {
            let after = match reconcile(&h, today) {
                Some(patch) => h.patched(&patch),
                None => h.clone(),
            };
            if after.completed_today {
                prop_assert_eq!(after.last_completed, Some(today));
            }
        }

        #[test]
        fn toggle_after_reconcile_flips_completion((h, today) in arb_habit()) {
            let current = match reconcile(&h, today) {
                Some(patch) => h.patched(&patch),
                None => h.clone(),
            };
            let next = current.patched(&toggle(&current, today));
            prop_assert_eq!(next.completed_today, !current.completed_today);
            if next.completed_today {
                prop_assert!(next.streak >= 1);
                prop_assert_eq!(next.last_completed, Some(today));
            } else {
                prop_assert_eq!(next.streak, current.streak.saturating_sub(1));
            }
        }

        #[test]
        fn completing_after_lapse_always_restarts_at_one(streak in 0u32..1000, gap in 2i64..365) {
            let today = date(2024, 3, 10);
            let h = habit(streak, Some(today - chrono::Duration::days(gap)), false);
            prop_assert_eq!(toggle(&h, today).streak, Some(1));
        }
    }
}
