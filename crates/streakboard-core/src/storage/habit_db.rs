//! SQLite-based habit storage.
//!
//! Every row carries a `version`; writes go through a single
//! `UPDATE ... WHERE id = ? AND version = ?` so a patch computed from a
//! stale read never lands, even across processes sharing the file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use super::{data_dir, migrations, HabitStore, StoredHabit};
use crate::error::StoreError;
use crate::events::{ChangeFeed, HabitEvent};
use crate::habit::{Frequency, Habit, HabitPatch};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_COLUMNS: &str = "SELECT id, user_id, name, description, category, frequency,
        streak, completed_today, last_completed, created_at, version
     FROM habits";

/// SQLite database for habit records.
///
/// Change events are published only for writes made through this handle.
pub struct HabitDb {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_stored(row: &rusqlite::Row) -> Result<StoredHabit, rusqlite::Error> {
    let frequency_str: String = row.get(5)?;
    let frequency = frequency_str.parse::<Frequency>().unwrap_or_default();

    let last_completed: Option<String> = row.get(8)?;
    let last_completed = last_completed
        .map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(8, e)))
        .transpose()?;

    let created_at_str: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(9, e))?;

    Ok(StoredHabit {
        habit: Habit {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            frequency,
            streak: row.get(6)?,
            completed_today: row.get(7)?,
            last_completed,
            created_at,
        },
        version: row.get(10)?,
    })
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

impl HabitDb {
    /// Open the database at `~/.config/streakboard/streakboard.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::open_at(dir.join("streakboard.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database connection lock poisoned".into()))
    }

    fn query(&self, sql: &str, user_id: Option<&str>) -> Result<Vec<StoredHabit>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match user_id {
            Some(user_id) => stmt.query_map(params![user_id], row_to_stored)?,
            None => stmt.query_map([], row_to_stored)?,
        };
        let mut habits = Vec::new();
        for row in rows {
            habits.push(row?);
        }
        Ok(habits)
    }
}

impl HabitStore for HabitDb {
    fn insert(&self, habit: &Habit) -> Result<StoredHabit, StoreError> {
        self.conn()?.execute(
            "INSERT INTO habits (id, user_id, name, description, category, frequency,
                streak, completed_today, last_completed, created_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1)",
            params![
                habit.id,
                habit.user_id,
                habit.name,
                habit.description,
                habit.category,
                habit.frequency.as_str(),
                habit.streak,
                habit.completed_today,
                format_date(habit.last_completed),
                habit.created_at.to_rfc3339(),
            ],
        )?;
        self.feed.publish(HabitEvent::HabitCreated {
            habit_id: habit.id.clone(),
            user_id: habit.user_id.clone(),
            at: Utc::now(),
        });
        Ok(StoredHabit {
            habit: habit.clone(),
            version: 1,
        })
    }

    fn get(&self, id: &str) -> Result<Option<StoredHabit>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_stored).optional()?)
    }

    fn list_for_user(&self, user_id: &str) -> Result<Vec<StoredHabit>, StoreError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE user_id = ?1 ORDER BY created_at, id"),
            Some(user_id),
        )
    }

    fn list_all(&self) -> Result<Vec<StoredHabit>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY user_id, created_at, id"), None)
    }

    fn apply(&self, id: &str, expected_version: u64, patch: &HabitPatch) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE habits SET
                streak = COALESCE(?1, streak),
                completed_today = COALESCE(?2, completed_today),
                last_completed = CASE WHEN ?3 THEN ?4 ELSE last_completed END,
                version = version + 1
             WHERE id = ?5 AND version = ?6",
            params![
                patch.streak,
                patch.completed_today,
                patch.last_completed.is_some(),
                format_date(patch.last_completed.flatten()),
                id,
                expected_version,
            ],
        )?;

        if changed == 0 {
            let actual: Option<u64> = conn
                .query_row(
                    "SELECT version FROM habits WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match actual {
                Some(actual) => StoreError::Conflict {
                    id: id.to_string(),
                    expected: expected_version,
                    actual,
                },
                None => StoreError::NotFound(id.to_string()),
            });
        }

        let user_id: String = conn.query_row(
            "SELECT user_id FROM habits WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        drop(conn);

        let version = expected_version + 1;
        debug!(habit_id = id, version, "patch committed");
        self.feed.publish(HabitEvent::HabitUpdated {
            habit_id: id.to_string(),
            user_id,
            version,
            at: Utc::now(),
        });
        Ok(version)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let user_id: Option<String> = conn
            .query_row(
                "SELECT user_id FROM habits WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };
        conn.execute("DELETE FROM habits WHERE id = ?1", params![id])?;
        drop(conn);

        self.feed.publish(HabitEvent::HabitDeleted {
            habit_id: id.to_string(),
            user_id,
            at: Utc::now(),
        });
        Ok(true)
    }

    fn changes(&self) -> broadcast::Receiver<HabitEvent> {
        self.feed.subscribe()
    }
}
