//! Snapshot storage backends.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::SnapshotStorage;
use crate::error::PersistenceError;

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl SnapshotStorage for NoopStorage {
  fn load(&self, _slot: &str) -> Result<Option<String>, PersistenceError> {
    Ok(None) // Always miss
  }

  fn save(&self, _slot: &str, _snapshot: &str) -> Result<(), PersistenceError> {
    Ok(()) // Discard
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  path: Option<PathBuf>,
}

impl SqliteStorage {
  /// Open snapshot storage at the default location.
  pub fn open() -> Result<Self, PersistenceError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open snapshot storage at `path`, creating parent directories as needed.
  pub fn open_at(path: &Path) -> Result<Self, PersistenceError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn, Some(path.to_path_buf()))
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, PersistenceError> {
    Self::with_connection(Connection::open_in_memory()?, None)
  }

  fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, PersistenceError> {
    conn.execute_batch(SNAPSHOT_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      path,
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, PersistenceError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(PersistenceError::NoDataDir)?;

    Ok(data_dir.join("comfort").join("cache.db"))
  }

  /// Location of the database file, `None` for in-memory storage.
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// When the snapshot under `slot` was last saved.
  pub fn saved_at(&self, slot: &str) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    let conn = self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)?;

    let saved_at: Option<String> = conn
      .query_row(
        "SELECT saved_at FROM snapshots WHERE slot = ?",
        params![slot],
        |row| row.get(0),
      )
      .optional()?;

    saved_at.map(|s| parse_datetime(&s)).transpose()
  }
}

/// Schema for snapshot storage.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    slot TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SnapshotStorage for SqliteStorage {
  fn load(&self, slot: &str) -> Result<Option<String>, PersistenceError> {
    let conn = self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)?;

    let data = conn
      .query_row(
        "SELECT data FROM snapshots WHERE slot = ?",
        params![slot],
        |row| row.get(0),
      )
      .optional()?;

    Ok(data)
  }

  fn save(&self, slot: &str, snapshot: &str) -> Result<(), PersistenceError> {
    let conn = self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)?;

    conn.execute(
      "INSERT OR REPLACE INTO snapshots (slot, data, saved_at)
       VALUES (?, ?, datetime('now'))",
      params![slot, snapshot],
    )?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| PersistenceError::Timestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_slot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.load("data").unwrap(), None);
    assert_eq!(storage.saved_at("data").unwrap(), None);
  }

  #[test]
  fn test_save_replaces_previous_snapshot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.save("data", "{\"first\":1}").unwrap();
    storage.save("data", "{\"second\":2}").unwrap();
    storage.save("other", "{}").unwrap();

    assert_eq!(storage.load("data").unwrap().as_deref(), Some("{\"second\":2}"));
    assert_eq!(storage.load("other").unwrap().as_deref(), Some("{}"));

    let saved_at = storage.saved_at("data").unwrap().unwrap();
    assert!((Utc::now() - saved_at).num_seconds().abs() < 60);
  }

  #[test]
  fn test_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      assert_eq!(storage.path(), Some(path.as_path()));
      storage.save("data", "snapshot").unwrap();
    }

    let reopened = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(reopened.load("data").unwrap().as_deref(), Some("snapshot"));
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.save("data", "snapshot").unwrap();
    assert_eq!(storage.load("data").unwrap(), None);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2021-09-28 14:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2021-09-28T14:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
