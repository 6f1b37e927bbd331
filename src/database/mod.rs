//! Database module
//!
//! Everything that touches the target database directly lives here:
//!
//! ```text
//! database/
//! └── core/               # Foundation
//!     ├── connection      # SQLite DatabaseConn wrapper and ConnectionProvider
//!     ├── lock            # Lock file guard serializing migration writers
//!     └── version_store   # schema_migrations tracking table
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use schemigrate::database::{DatabaseConn, VersionStore};
//!
//! let db = DatabaseConn::open_path("/tmp/app.sqlite3")?;
//! let store = VersionStore::new(&db.conn);
//! store.ensure_initialized()?;
//! println!("{}", store.read()?);
//! ```

pub mod core;

pub use core::{
    ConnectionProvider, DatabaseConn, MigrationLock, SchemaObject, SqliteProvider, VersionRecord,
    VersionSchema, VersionStore, STALE_LOCK_AGE, VERSION_TABLE,
};
