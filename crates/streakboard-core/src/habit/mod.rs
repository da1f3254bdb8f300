//! Habit model and streak state.
//!
//! A [`Habit`] is owned by exactly one user and carries three mutable
//! fields (`streak`, `completed_today`, `last_completed`). Those fields are
//! only ever changed through a [`HabitPatch`] produced by the [`engine`].

pub mod engine;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub use engine::{gap_days, reconcile, toggle};

/// How often the user intends to perform a habit.
///
/// Descriptive only; the streak engine always counts calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }
}

/// A tracked habit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Habit {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
    /// Consecutive calendar days completed, ending at or before today.
    pub streak: u32,
    pub completed_today: bool,
    /// Calendar date of the most recent completion.
    pub last_completed: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Descriptive fields supplied when creating a habit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHabit {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
}

impl NewHabit {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Habit {
    /// Create a fresh habit: no streak, never completed.
    pub fn new(user_id: impl Into<String>, fields: NewHabit, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: fields.name,
            description: fields.description,
            category: fields.category,
            frequency: fields.frequency,
            streak: 0,
            completed_today: false,
            last_completed: None,
            created_at,
        }
    }

    /// Apply a patch in place. Fields absent from the patch are untouched.
    pub fn apply_patch(&mut self, patch: &HabitPatch) {
        if let Some(streak) = patch.streak {
            self.streak = streak;
        }
        if let Some(completed_today) = patch.completed_today {
            self.completed_today = completed_today;
        }
        if let Some(last_completed) = patch.last_completed {
            self.last_completed = last_completed;
        }
    }

    /// Return a copy with the patch applied.
    pub fn patched(&self, patch: &HabitPatch) -> Self {
        let mut next = self.clone();
        next.apply_patch(patch);
        next
    }

    /// Classify the habit relative to `today`.
    pub fn state(&self, today: NaiveDate) -> StreakState {
        match self.last_completed {
            None => StreakState::Fresh,
            Some(last_day) if self.completed_today || gap_days(last_day, today) <= 1 => {
                StreakState::Active(self.streak)
            }
            Some(_) => StreakState::Lapsed(self.streak),
        }
    }
}

/// The changed subset of a habit's mutable fields.
///
/// `last_completed` is doubly optional: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_today: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub last_completed: Option<Option<NaiveDate>>,
}

impl HabitPatch {
    pub fn is_empty(&self) -> bool {
        self.streak.is_none() && self.completed_today.is_none() && self.last_completed.is_none()
    }

    /// `None` when the patch would change nothing.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    /// Combine two patches; fields set in `later` win.
    pub fn merge(self, later: HabitPatch) -> HabitPatch {
        HabitPatch {
            streak: later.streak.or(self.streak),
            completed_today: later.completed_today.or(self.completed_today),
            last_completed: later.last_completed.or(self.last_completed),
        }
    }
}

// A present `null` means "clear", so it must not collapse into "absent".
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<NaiveDate>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<NaiveDate>::deserialize(deserializer).map(Some)
}

/// Logical streak state of a habit on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "streak", rename_all = "snake_case")]
pub enum StreakState {
    /// Never completed.
    Fresh,
    /// Completed today, or completed yesterday and still extendable.
    Active(u32),
    /// Two or more days since the last completion; holds the stale streak
    /// until the next reconcile or toggle clears it.
    Lapsed(u32),
}
