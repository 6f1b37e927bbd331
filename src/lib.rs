#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Schemigrate - versioned schema migrations for SQLite
//!
//! Schemigrate tracks which schema changes have been applied to a database,
//! applies pending changes in order, and reverses them. A migration whose
//! script fails leaves the database flagged as dirty, and every further
//! operation is refused until an operator resolves it.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Engine, version store, catalog, dispatcher | `rusqlite`, `config` |
//! | `display` | Table output for status reports | `tabled` |
//! | `cli` | The `schemigrate` binary | All above + `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`database`]**: SQLite connection, migration lock and the version store
//! - **[`migrate`]**: migration catalog, engine state machine and dispatcher
//! - **[`config`]**: configuration loading (file, `SCHEMIGRATE_*`, `DB_ADDR`/`DB_PASS`)
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use schemigrate::{migrate, MigrateConfig};
//!
//! let config = MigrateConfig::new(&None)?;
//! let outcome = migrate(&config, "", "file://./migrations")?;
//! println!("{}", outcome);
//! ```
//!
//! ## Embedding migrations
//!
//! ```rust,ignore
//! use schemigrate::database::DatabaseConn;
//! use schemigrate::migrate::{Catalog, Migration, MigrationEngine};
//!
//! let catalog = Catalog::new(vec![
//!     Migration::new(1, "create_users", "CREATE TABLE users (id INTEGER);", Some("DROP TABLE users;")),
//! ])?;
//! let db = DatabaseConn::open_path("app.sqlite3")?;
//! MigrationEngine::new(&db, &catalog).apply_pending()?;
//! ```

pub mod config;
pub mod database;
pub mod migrate;

#[cfg(feature = "display")]
pub mod output;

pub use config::{ConnectionConfig, MigrateConfig};

pub use database::{
    ConnectionProvider, DatabaseConn, MigrationLock, SqliteProvider, VersionRecord, VersionStore,
    VERSION_TABLE,
};

pub use migrate::{
    drop_tracking_table, migrate, Catalog, DirectorySource, Dispatcher, EngineOptions,
    MigrateError, Migration, MigrationEngine, MigrationOutcome, MigrationSource, Operation,
    SchemaState, StaticSource, StatusReport,
};

#[cfg(feature = "display")]
pub use output::OutputFormat;
