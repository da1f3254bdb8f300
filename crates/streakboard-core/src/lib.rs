//! # Streakboard Core Library
//!
//! Habit streak tracking for the Streakboard dashboard. The CLI and any
//! other front end are thin layers over this crate.
//!
//! ## Architecture
//!
//! - **Streak Engine**: pure `reconcile`/`toggle` transitions over a habit
//!   snapshot and a caller-supplied calendar date
//! - **Storage**: a versioned [`HabitStore`] contract with SQLite and
//!   in-memory implementations, plus TOML configuration
//! - **Service**: the read-compute-write loop every call site shares,
//!   retrying on optimistic-write conflicts
//! - **Maintenance**: a bulk reconcile pass over every stored habit
//!
//! ## Key Components
//!
//! - [`reconcile`] / [`toggle`]: streak state transitions
//! - [`HabitService`]: per-user reads, toggles and dashboard summaries
//! - [`MaintenanceJob`]: scheduled catch-up over the whole store
//! - [`HabitDb`]: SQLite persistence
//! - [`Config`]: application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod habit;
pub mod maintenance;
pub mod service;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::{ChangeFeed, HabitEvent};
pub use habit::{reconcile, toggle, Frequency, Habit, HabitPatch, NewHabit, StreakState};
pub use maintenance::{MaintenanceJob, MaintenanceReport};
pub use service::{HabitListing, HabitService, HabitSummary};
pub use storage::{Config, HabitDb, HabitStore, HabitSubscription, MemoryStore, StoredHabit};
