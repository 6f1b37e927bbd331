//! Version store
//!
//! The tracking table holds exactly one row describing which migration version
//! is applied and whether the last attempted script completed. It is the only
//! source of truth for the schema state; nothing infers the state from the
//! presence of other tables.

use crate::migrate::MigrateError;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;

/// Name of the tracking table
pub const VERSION_TABLE: &str = "schema_migrations";

/// Schema definitions for the tracking table
pub struct VersionSchema;

impl VersionSchema {
    pub const TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            dirty INTEGER NOT NULL DEFAULT 0,
            pending_version INTEGER,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    pub const INITIAL_ROW: &'static str = r#"
        INSERT OR IGNORE INTO schema_migrations (id, version, dirty, pending_version)
        VALUES (1, 0, 0, NULL);
    "#;
}

/// Persisted state of the tracking table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// Highest applied migration version, 0 when none is applied
    pub version: i64,
    pub dirty: bool,
    /// Migration whose script was in flight when the record went dirty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_version: Option<i64>,
}

impl VersionRecord {
    pub fn clean(version: i64) -> Self {
        Self {
            version,
            dirty: false,
            pending_version: None,
        }
    }

    pub fn dirty(version: i64, pending_version: i64) -> Self {
        Self {
            version,
            dirty: true,
            pending_version: Some(pending_version),
        }
    }
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self::clean(0)
    }
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dirty, self.pending_version) {
            (false, _) => write!(f, "Clean({})", self.version),
            (true, Some(p)) => write!(f, "Dirty({}, {})", self.version, p),
            (true, None) => write!(f, "Dirty({})", self.version),
        }
    }
}

/// Read/write access to the tracking table
///
/// All writes replace the single row, so the store is either at the old
/// record or the new one.
pub struct VersionStore<'a> {
    conn: &'a Connection,
}

impl<'a> VersionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create the tracking table and its initial `Clean(0)` row if absent
    ///
    /// Both statements are no-ops when another process got there first.
    pub fn ensure_initialized(&self) -> Result<(), MigrateError> {
        self.conn
            .execute(VersionSchema::TABLE, [])
            .map_err(MigrateError::StoreUnavailable)?;
        self.conn
            .execute(VersionSchema::INITIAL_ROW, [])
            .map_err(MigrateError::StoreUnavailable)?;
        Ok(())
    }

    pub fn exists(&self) -> Result<bool, MigrateError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [VERSION_TABLE],
                |row| row.get(0),
            )
            .map_err(MigrateError::StoreUnavailable)?;
        Ok(count > 0)
    }

    /// Read the current record
    ///
    /// A table without its row reads as `Clean(0)`.
    pub fn read(&self) -> Result<VersionRecord, MigrateError> {
        let record = self
            .conn
            .query_row(
                "SELECT version, dirty, pending_version FROM schema_migrations WHERE id = 1",
                [],
                |row| {
                    Ok(VersionRecord {
                        version: row.get(0)?,
                        dirty: row.get(1)?,
                        pending_version: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(MigrateError::StoreUnavailable)?;
        Ok(record.unwrap_or_default())
    }

    /// Atomically replace the record
    pub fn write(&self, record: VersionRecord) -> Result<(), MigrateError> {
        self.conn
            .execute(
                "INSERT INTO schema_migrations (id, version, dirty, pending_version, updated_at)
                 VALUES (1, ?1, ?2, ?3, strftime('%s', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    version = excluded.version,
                    dirty = excluded.dirty,
                    pending_version = excluded.pending_version,
                    updated_at = excluded.updated_at",
                rusqlite::params![record.version, record.dirty, record.pending_version],
            )
            .map_err(MigrateError::StoreUnavailable)?;
        Ok(())
    }

    /// Remove the tracking table only
    ///
    /// Fails with `NotFound` when the table does not exist.
    pub fn drop_table(&self) -> Result<(), MigrateError> {
        if !self.exists()? {
            return Err(MigrateError::NotFound(format!("table {}", VERSION_TABLE)));
        }
        self.conn
            .execute("DROP TABLE schema_migrations", [])
            .map_err(MigrateError::StoreUnavailable)?;
        Ok(())
    }

    /// Unix timestamp of the last write, if the table has a row
    pub fn updated_at(&self) -> Result<Option<i64>, MigrateError> {
        self.conn
            .query_row(
                "SELECT updated_at FROM schema_migrations WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(MigrateError::StoreUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys=ON", []).unwrap();
        conn
    }

    #[test]
    fn test_not_initialized() {
        let conn = create_test_db();
        let store = VersionStore::new(&conn);

        assert!(!store.exists().unwrap());
        assert!(matches!(
            store.read(),
            Err(MigrateError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = create_test_db();
        let store = VersionStore::new(&conn);

        store.ensure_initialized().unwrap();
        store.write(VersionRecord::clean(4)).unwrap();
        store.ensure_initialized().unwrap();

        assert!(store.exists().unwrap());
        assert_eq!(store.read().unwrap(), VersionRecord::clean(4));
    }

    #[test]
    fn test_initialize_racing_processes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.sqlite3");
        let a = Connection::open(&path).unwrap();
        let b = Connection::open(&path).unwrap();

        VersionStore::new(&a).ensure_initialized().unwrap();
        VersionStore::new(&b).ensure_initialized().unwrap();

        assert_eq!(
            VersionStore::new(&b).read().unwrap(),
            VersionRecord::default()
        );
    }

    #[test]
    fn test_write_and_read() {
        let conn = create_test_db();
        let store = VersionStore::new(&conn);
        store.ensure_initialized().unwrap();

        assert_eq!(store.read().unwrap(), VersionRecord::clean(0));

        store.write(VersionRecord::dirty(2, 3)).unwrap();
        let record = store.read().unwrap();
        assert!(record.dirty);
        assert_eq!(record.version, 2);
        assert_eq!(record.pending_version, Some(3));

        store.write(VersionRecord::clean(3)).unwrap();
        assert_eq!(store.read().unwrap(), VersionRecord::clean(3));
        assert!(store.updated_at().unwrap().is_some());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_drop_table() {
        let conn = create_test_db();
        let store = VersionStore::new(&conn);

        assert!(matches!(store.drop_table(), Err(MigrateError::NotFound(_))));

        store.ensure_initialized().unwrap();
        conn.execute("CREATE TABLE users (id INTEGER)", []).unwrap();
        store.drop_table().unwrap();

        assert!(!store.exists().unwrap());
        let users: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'users'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(users, 1);
    }

    #[test]
    fn test_record_display() {
        assert_eq!(VersionRecord::clean(2).to_string(), "Clean(2)");
        assert_eq!(VersionRecord::dirty(2, 3).to_string(), "Dirty(2, 3)");
    }
}
