//! Migration engine
//!
//! The engine is a state machine over the version record:
//!
//! ```text
//!            apply / step-up / step-down / drop
//!   Clean(V) ──────────────────────────────────▶ Clean(V')
//!      │                                            ▲
//!      │ script fails                               │ force(V')
//!      ▼                                            │
//!   Dirty(V, S) ────────────────────────────────────┘
//! ```
//!
//! Every script runs inside a bracket: the record is committed as
//! `Dirty(V, S)` first, then the script and the `Clean` write that confirms
//! it are committed together. A failing script rolls back its own changes
//! but leaves the record dirty, and every further transition except `force`
//! is refused until an operator resolves it.

use crate::database::core::{DatabaseConn, SchemaObject, VersionRecord, VersionStore, VERSION_TABLE};
use crate::migrate::error::{is_interrupt, Direction};
use crate::migrate::source::{Catalog, Migration};
use crate::migrate::MigrateError;
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of SQLite VM instructions between timeout checks
const PROGRESS_OPS: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Run each script and its version write in one transaction
    pub transactional: bool,

    /// Upper bound for a single script, `None` for unbounded
    pub statement_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            transactional: true,
            statement_timeout: None,
        }
    }
}

/// Schema state derived from the version record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SchemaState {
    Clean { version: i64 },
    Dirty { version: i64, failed: Option<i64> },
}

impl SchemaState {
    pub fn version(&self) -> i64 {
        match self {
            SchemaState::Clean { version } | SchemaState::Dirty { version, .. } => *version,
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, SchemaState::Dirty { .. })
    }
}

impl From<VersionRecord> for SchemaState {
    fn from(record: VersionRecord) -> Self {
        if record.dirty {
            SchemaState::Dirty {
                version: record.version,
                failed: record.pending_version,
            }
        } else {
            SchemaState::Clean {
                version: record.version,
            }
        }
    }
}

impl fmt::Display for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaState::Clean { version } => write!(f, "clean at version {}", version),
            SchemaState::Dirty {
                version,
                failed: Some(s),
            } => write!(f, "dirty at version {} (migration {} failed)", version, s),
            SchemaState::Dirty {
                version,
                failed: None,
            } => write!(f, "dirty at version {}", version),
        }
    }
}

/// Result of a successful operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    Applied { from: i64, to: i64, count: usize },
    Reverted { from: i64, to: i64 },
    Dropped { objects: Vec<String> },
    Forced { version: i64 },
    TrackingTableDropped,
    /// Nothing to do; the record is unchanged
    NoChange { version: i64 },
}

impl MigrationOutcome {
    pub fn is_no_change(&self) -> bool {
        matches!(self, MigrationOutcome::NoChange { .. })
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Applied { from, to, count } => write!(
                f,
                "applied {} migration(s), version {} -> {}",
                count, from, to
            ),
            MigrationOutcome::Reverted { from, to } => {
                write!(f, "reverted version {} -> {}", from, to)
            }
            MigrationOutcome::Dropped { objects } => {
                write!(f, "dropped {} schema object(s), version reset to 0", objects.len())
            }
            MigrationOutcome::Forced { version } => write!(f, "forced version {}", version),
            MigrationOutcome::TrackingTableDropped => {
                write!(f, "dropped table {}", VERSION_TABLE)
            }
            MigrationOutcome::NoChange { version } => {
                write!(f, "no change, database is at version {}", version)
            }
        }
    }
}

/// Per-migration line of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    pub applied: bool,
    pub reversible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state: SchemaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<i64>,
    pub pending: usize,
    /// Time of the last write to the version record (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    pub migrations: Vec<MigrationStatus>,
}

/// Reconciles the version store of one connection against a catalog
pub struct MigrationEngine<'a> {
    db: &'a DatabaseConn,
    catalog: &'a Catalog,
    options: EngineOptions,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(db: &'a DatabaseConn, catalog: &'a Catalog) -> Self {
        Self::with_options(db, catalog, EngineOptions::default())
    }

    pub fn with_options(db: &'a DatabaseConn, catalog: &'a Catalog, options: EngineOptions) -> Self {
        Self {
            db,
            catalog,
            options,
        }
    }

    fn store(&self) -> VersionStore<'_> {
        VersionStore::new(&self.db.conn)
    }

    /// Current state, creating the tracking table on first use
    pub fn state(&self) -> Result<SchemaState, MigrateError> {
        let store = self.store();
        store.ensure_initialized()?;
        Ok(store.read()?.into())
    }

    /// Apply every pending migration in ascending order, stopping at the first failure
    pub fn apply_pending(&self) -> Result<MigrationOutcome, MigrateError> {
        let from = self.require_clean()?;
        let pending = self.catalog.pending_after(from);
        if pending.is_empty() {
            info!("No pending migrations, database is at version {}", from);
            return Ok(MigrationOutcome::NoChange { version: from });
        }

        let mut current = from;
        for migration in pending {
            self.run_step(current, migration, Direction::Up, migration.version)?;
            current = migration.version;
        }

        Ok(MigrationOutcome::Applied {
            from,
            to: current,
            count: pending.len(),
        })
    }

    /// Apply exactly the next pending migration
    pub fn step_forward(&self) -> Result<MigrationOutcome, MigrateError> {
        let from = self.require_clean()?;
        let Some(next) = self.catalog.pending_after(from).first() else {
            info!("No pending migrations, database is at version {}", from);
            return Ok(MigrationOutcome::NoChange { version: from });
        };

        self.run_step(from, next, Direction::Up, next.version)?;
        Ok(MigrationOutcome::Applied {
            from,
            to: next.version,
            count: 1,
        })
    }

    /// Reverse the most recently applied migration
    pub fn step_backward(&self) -> Result<MigrationOutcome, MigrateError> {
        let from = self.require_clean()?;
        if from == 0 {
            return Err(MigrateError::NothingToReverse);
        }
        let migration = self
            .catalog
            .get(from)
            .ok_or(MigrateError::UnknownVersion(from))?;
        if migration.down.is_none() {
            return Err(MigrateError::NoDownScript { version: from });
        }

        let to = self.catalog.previous_version(from);
        self.run_step(from, migration, Direction::Down, to)?;
        Ok(MigrationOutcome::Reverted { from, to })
    }

    /// Drop every user view, trigger and table, then reset the record to `Clean(0)`
    ///
    /// The tracking table itself survives.
    pub fn drop_all(&self) -> Result<MigrationOutcome, MigrateError> {
        self.require_clean_record()?;

        let objects = self.db.user_objects(&[VERSION_TABLE])?;
        self.db.conn.execute_batch("PRAGMA foreign_keys=OFF")?;
        let result = self.drop_objects(&objects);
        // restore before reporting, the connection may be reused
        let restore = self.db.conn.execute_batch("PRAGMA foreign_keys=ON");
        result?;
        restore?;

        let names: Vec<String> = objects.into_iter().map(|o| o.name).collect();
        info!("Dropped {} schema object(s), version reset to 0", names.len());
        Ok(MigrationOutcome::Dropped { objects: names })
    }

    fn drop_objects(&self, objects: &[SchemaObject]) -> Result<(), MigrateError> {
        let tx = self.db.transaction()?;
        for object in objects {
            let sql = format!(
                "DROP {} IF EXISTS \"{}\"",
                object.kind.to_uppercase(),
                object.name.replace('"', "\"\"")
            );
            debug!("{}", sql);
            tx.execute(&sql, [])?;
        }
        VersionStore::new(&tx).write(VersionRecord::clean(0))?;
        tx.commit()?;
        Ok(())
    }

    /// Overwrite the record with `Clean(version)`, regardless of dirty state
    ///
    /// This is the operator's way out of a dirty record once the schema has
    /// been repaired by hand.
    pub fn force(&self, version: i64) -> Result<MigrationOutcome, MigrateError> {
        if version != 0 && !self.catalog.contains(version) {
            return Err(MigrateError::UnknownVersion(version));
        }
        let store = self.store();
        store.ensure_initialized()?;
        let previous = store.read()?;
        store.write(VersionRecord::clean(version))?;
        warn!("Forced version record from {} to Clean({})", previous, version);
        Ok(MigrationOutcome::Forced { version })
    }

    /// Read-only report of the record and every catalog entry
    ///
    /// Never writes, so it does not wait on a migration holding the write
    /// lock. A missing tracking table reads as `Clean(0)`.
    pub fn status(&self) -> Result<StatusReport, MigrateError> {
        let store = self.store();
        let (state, updated_at) = match store.exists()? {
            true => (SchemaState::from(store.read()?), store.updated_at()?),
            false => (SchemaState::Clean { version: 0 }, None),
        };
        let current = state.version();
        let migrations: Vec<MigrationStatus> = self
            .catalog
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name.clone(),
                applied: m.version <= current,
                reversible: m.is_reversible(),
            })
            .collect();

        Ok(StatusReport {
            state,
            latest: self.catalog.last_version(),
            pending: self.catalog.pending_after(current).len(),
            updated_at: updated_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339()),
            migrations,
        })
    }

    /// Read the record and refuse to continue from a dirty one
    fn require_clean_record(&self) -> Result<i64, MigrateError> {
        match self.state()? {
            SchemaState::Clean { version } => Ok(version),
            SchemaState::Dirty { version, failed } => {
                warn!(
                    "Refusing to migrate: database is dirty at version {} (failed migration: {:?})",
                    version, failed
                );
                Err(MigrateError::DirtyStateBlocksOperation {
                    version,
                    migration: failed,
                })
            }
        }
    }

    /// Like `require_clean_record`, and the version must belong to the catalog
    fn require_clean(&self) -> Result<i64, MigrateError> {
        let version = self.require_clean_record()?;
        if version != 0 && !self.catalog.contains(version) {
            return Err(MigrateError::UnknownVersion(version));
        }
        Ok(version)
    }

    /// Run one script inside the dirty bracket and record `Clean(target)` on success
    fn run_step(
        &self,
        from: i64,
        migration: &Migration,
        direction: Direction,
        target: i64,
    ) -> Result<(), MigrateError> {
        let script = match direction {
            Direction::Up => migration.up.as_str(),
            Direction::Down => migration
                .down
                .as_deref()
                .ok_or(MigrateError::NoDownScript {
                    version: migration.version,
                })?,
        };

        let store = self.store();
        store.write(VersionRecord::dirty(from, migration.version))?;

        let started = Instant::now();
        let result = if self.options.transactional {
            self.run_transactional(script, target, migration, direction)
        } else {
            self.execute_script(&self.db.conn, script)
                .map_err(|e| self.script_error(migration, direction, e))
                .and_then(|_| store.write(VersionRecord::clean(target)))
        };

        match &result {
            Ok(()) => info!(
                "{}/{} {} ({:.3}s)",
                migration.version,
                direction,
                migration.name,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => warn!(
                "{}/{} {} failed, database left dirty at version {}: {}",
                migration.version, direction, migration.name, from, e
            ),
        }
        result
    }

    fn run_transactional(
        &self,
        script: &str,
        target: i64,
        migration: &Migration,
        direction: Direction,
    ) -> Result<(), MigrateError> {
        let tx = self.db.transaction()?;
        self.execute_script(&tx, script)
            .map_err(|e| self.script_error(migration, direction, e))?;
        VersionStore::new(&tx).write(VersionRecord::clean(target))?;
        tx.commit()?;
        Ok(())
    }

    fn execute_script(&self, conn: &Connection, script: &str) -> rusqlite::Result<()> {
        let Some(timeout) = self.options.statement_timeout else {
            return conn.execute_batch(script);
        };

        let deadline = Instant::now() + timeout;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = conn.execute_batch(script);
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }

    fn script_error(
        &self,
        migration: &Migration,
        direction: Direction,
        source: rusqlite::Error,
    ) -> MigrateError {
        if is_interrupt(&source) {
            return MigrateError::Timeout {
                what: format!("migration {}/{} {}", migration.version, direction, migration.name),
            };
        }
        MigrateError::ScriptExecutionFailed {
            version: migration.version,
            name: migration.name.clone(),
            direction,
            source,
        }
    }
}
