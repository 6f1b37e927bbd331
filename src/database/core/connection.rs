//! Database connection management
//!
//! This module provides the SQLite connection wrapper the engine runs against,
//! and the provider that resolves a [`ConnectionConfig`] into a live connection.

use crate::config::ConnectionConfig;
use crate::database::core::MigrationLock;
use crate::migrate::MigrateError;
use anyhow::{anyhow, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error handling.
pub struct DatabaseConn {
    pub conn: Connection,
}

/// A user-defined schema object as listed in `sqlite_master`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p, e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Open a database from a SQLite URI filename
    ///
    /// `busy_timeout` bounds how long statements wait on a lock held by
    /// another connection.
    pub fn open_uri(uri: &str, busy_timeout: Duration) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(uri, flags)
            .map_err(|e| anyhow!("Failed to open database at '{}': {}", uri, e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| anyhow!("Failed to set busy timeout: {}", e))?;

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Open a database at the specified path (convenience method)
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Configure the database with the settings migrations rely on
    fn configure(&self) -> Result<()> {
        // WAL lets readers keep going while a migration holds the write lock
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;

        // Version writes must be durable before the next script starts
        self.conn
            .execute("PRAGMA synchronous=FULL", [])
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| anyhow!("Failed to enable foreign keys: {}", e))?;

        Ok(())
    }

    /// Verify the connection is usable
    pub fn ping(&self) -> Result<()> {
        let _: i64 = self
            .conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|e| anyhow!("Connection check failed: {}", e))?;
        Ok(())
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        self.conn
            .execute(sql, [])
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    /// Begin an unchecked transaction
    pub fn transaction(&self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    /// Check if a column exists on a table
    pub fn column_exists(&self, table_name: &str, column: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name=?2",
                [table_name, column],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check column existence: {}", e))?;
        Ok(count > 0)
    }

    /// List user-defined views, triggers and tables, skipping SQLite internals
    /// and any name in `exclude`
    pub fn user_objects(&self, exclude: &[&str]) -> rusqlite::Result<Vec<SchemaObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, name FROM sqlite_master
             WHERE type IN ('view', 'trigger', 'table') AND name NOT LIKE 'sqlite_%'
             ORDER BY CASE type WHEN 'view' THEN 0 WHEN 'trigger' THEN 1 ELSE 2 END, name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        let mut objects = Vec::new();
        for row in rows {
            let object = row?;
            if !exclude.contains(&object.name.as_str()) {
                objects.push(object);
            }
        }
        Ok(objects)
    }
}

/// Yields usable connections to the migration target
///
/// Connections are acquired once per operation and released when dropped.
pub trait ConnectionProvider {
    fn connect(&self) -> Result<DatabaseConn, MigrateError>;

    /// Serialize migration writers; `None` when the target needs no lock
    fn lock(&self) -> Result<Option<MigrationLock>, MigrateError>;

    /// Human-readable target description for logs
    fn describe(&self) -> String;
}

/// Connection provider for SQLite targets
pub struct SqliteProvider {
    config: ConnectionConfig,
    timeout: Duration,
}

impl SqliteProvider {
    pub fn new(config: ConnectionConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn lock_path(&self) -> Option<PathBuf> {
        self.config
            .sqlite_path()
            .map(|p| PathBuf::from(format!("{}.migrate.lock", p)))
    }
}

impl ConnectionProvider for SqliteProvider {
    fn connect(&self) -> Result<DatabaseConn, MigrateError> {
        if !self.config.is_memory() {
            std::fs::create_dir_all(&self.config.address).map_err(|e| {
                MigrateError::ConnectionFailed(format!(
                    "unable to create directory '{}': {}",
                    self.config.address, e
                ))
            })?;
        }

        debug!(
            "Connecting to {} (port and credentials are not used by sqlite)",
            self.config.redacted_url()
        );

        let db = DatabaseConn::open_uri(&self.config.sqlite_uri(), self.timeout)
            .map_err(|e| MigrateError::ConnectionFailed(e.to_string()))?;
        db.ping()
            .map_err(|e| MigrateError::ConnectionFailed(e.to_string()))?;
        Ok(db)
    }

    fn lock(&self) -> Result<Option<MigrationLock>, MigrateError> {
        match self.lock_path() {
            Some(path) => MigrationLock::acquire(&path, self.timeout).map(Some),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        self.config
            .sqlite_path()
            .unwrap_or_else(|| self.config.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_table_and_column_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY, label TEXT)")
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
        assert!(db.column_exists("test_table", "label").unwrap());
        assert!(!db.column_exists("test_table", "missing").unwrap());
    }

    #[test]
    fn test_user_objects_order_and_exclusion() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE a (id INTEGER PRIMARY KEY AUTOINCREMENT);
                 CREATE TABLE keep_me (id INTEGER);
                 CREATE VIEW v_a AS SELECT * FROM a;
                 CREATE TRIGGER t_a AFTER INSERT ON a BEGIN SELECT 1; END;",
            )
            .unwrap();

        let objects = db.user_objects(&["keep_me"]).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
        // sqlite_sequence is internal and never listed
        assert_eq!(names, vec!["v_a", "t_a", "a"]);
    }

    #[test]
    fn test_provider_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let address = dir.path().join("nested").to_string_lossy().to_string();
        let provider = SqliteProvider::new(
            ConnectionConfig::in_dir(&address, "app"),
            Duration::from_secs(1),
        );

        let db = provider.connect().unwrap();
        db.execute("CREATE TABLE t (id INTEGER)").unwrap();
        assert!(dir.path().join("nested/app.sqlite3").exists());

        let lock = provider.lock().unwrap().unwrap();
        assert!(lock.path().ends_with("app.sqlite3.migrate.lock"));
    }

    #[test]
    fn test_provider_in_memory_has_no_lock() {
        let provider = SqliteProvider::new(ConnectionConfig::in_memory(), Duration::from_secs(1));
        assert!(provider.connect().is_ok());
        assert!(provider.lock().unwrap().is_none());
    }

    #[test]
    fn test_provider_connection_failed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let provider = SqliteProvider::new(
            ConnectionConfig::in_dir(&blocker.to_string_lossy(), "app"),
            Duration::from_secs(1),
        );

        assert!(matches!(
            provider.connect(),
            Err(MigrateError::ConnectionFailed(_))
        ));
    }
}
