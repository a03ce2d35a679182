//! Persistence of resolved commands.
//!
//! The resolver hands every resolved command of a test to a [`Persistence`]
//! store. [`DoNothingPersistence`] discards them; [`SqlitePersistence`] keeps a
//! journal in an SQLite database.

use crate::command::Command;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Error type for persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode expected output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("journal connection is poisoned")]
    Poisoned,
}

/// A store notified of resolved commands.
pub trait Persistence: Send + Sync {
    /// Record one resolved command of the named test.
    fn record_command(&self, test_name: &str, command: &Command) -> Result<(), PersistenceError>;
}

/// A store that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoNothingPersistence;

impl Persistence for DoNothingPersistence {
    fn record_command(&self, _: &str, _: &Command) -> Result<(), PersistenceError> {
        Ok(())
    }
}

const JOURNAL_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS resolved_commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_name TEXT NOT NULL,
    input_line TEXT NOT NULL,
    timeout REAL NOT NULL,
    expected_output TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);";

/// A journal of resolved commands in an SQLite database.
pub struct SqlitePersistence {
    conn: Mutex<rusqlite::Connection>,
}

/// One row of the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub test_name: String,
    pub input_line: String,
    pub timeout: f32,
    /// Expected output as JSON.
    pub expected_output: String,
}

impl SqlitePersistence {
    /// Open (or create) a journal at the given path.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        Self::from_connection(rusqlite::Connection::open(path)?)
    }

    /// An in-memory journal.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(rusqlite::Connection::open_in_memory()?)
    }

    fn from_connection(conn: rusqlite::Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(JOURNAL_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All entries recorded for a test, in recording order.
    pub fn entries(&self, test_name: &str) -> Result<Vec<JournalEntry>, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT test_name, input_line, timeout, expected_output
             FROM resolved_commands WHERE test_name = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([test_name], |row| {
            Ok(JournalEntry {
                test_name: row.get(0)?,
                input_line: row.get(1)?,
                timeout: row.get::<_, f64>(2)? as f32,
                expected_output: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl Persistence for SqlitePersistence {
    fn record_command(&self, test_name: &str, command: &Command) -> Result<(), PersistenceError> {
        let expected = serde_json::to_string(&command.expected_output)?;
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        conn.execute(
            "INSERT INTO resolved_commands (test_name, input_line, timeout, expected_output, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                test_name,
                command.input.line,
                f64::from(command.timeout),
                expected,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
