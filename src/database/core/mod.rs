//! Core database infrastructure
//!
//! This module provides the foundational database components the engine uses:
//! - `DatabaseConn`: Core SQLite connection wrapper with configuration
//! - `ConnectionProvider` / `SqliteProvider`: resolve a target into a connection
//! - `MigrationLock`: scoped lock that serializes migration writers
//! - `VersionStore`: the single-row tracking table

mod connection;
mod lock;
mod version_store;

pub use connection::{ConnectionProvider, DatabaseConn, SchemaObject, SqliteProvider};
pub use lock::{MigrationLock, STALE_LOCK_AGE};
pub use version_store::{VersionRecord, VersionSchema, VersionStore, VERSION_TABLE};
