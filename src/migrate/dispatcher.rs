//! Operation dispatcher
//!
//! Maps named operations onto engine calls. The dispatcher owns the
//! per-operation resources (catalog, connection, migration lock) and adds no
//! recovery logic of its own.

use crate::database::core::{ConnectionProvider, VersionStore};
use crate::migrate::engine::{EngineOptions, MigrationEngine, MigrationOutcome, StatusReport};
use crate::migrate::source::{Catalog, MigrationSource};
use crate::migrate::MigrateError;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Operations the dispatcher understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Apply every pending migration
    Apply,
    /// Apply the next pending migration
    StepUp,
    /// Reverse the last applied migration
    StepDown,
    /// Drop all schema objects and reset the version to 0
    Drop,
    /// Drop only the tracking table, bypassing the engine
    DropTrackingTable,
    /// Overwrite the version record with a clean version
    Force(i64),
}

impl Operation {
    /// Resolve an operation name
    ///
    /// Accepts the canonical names as well as the legacy spellings
    /// (`""`, `upgrade_migration`, `downgrade_migration`, `drop_smtable`).
    /// `force` carries an argument and is spelled `force:<VERSION>`.
    pub fn from_name(name: &str) -> Result<Operation, MigrateError> {
        match name.trim() {
            "" | "apply" | "up" => Ok(Operation::Apply),
            "step-up" | "upgrade_migration" => Ok(Operation::StepUp),
            "step-down" | "downgrade_migration" => Ok(Operation::StepDown),
            "drop" => Ok(Operation::Drop),
            "drop-tracking-table" | "drop_smtable" => Ok(Operation::DropTrackingTable),
            other => match other.strip_prefix("force:").map(|v| v.parse::<i64>()) {
                Some(Ok(version)) if version >= 0 => Ok(Operation::Force(version)),
                _ => Err(MigrateError::InvalidOperation(name.to_string())),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Apply => "apply",
            Operation::StepUp => "step-up",
            Operation::StepDown => "step-down",
            Operation::Drop => "drop",
            Operation::DropTrackingTable => "drop-tracking-table",
            Operation::Force(_) => "force",
        }
    }

    /// Get a list of all operation names for help text
    pub fn all_names() -> &'static [&'static str] {
        &[
            "apply",
            "step-up",
            "step-down",
            "drop",
            "drop-tracking-table",
            "force:<VERSION>",
        ]
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Force(version) => write!(f, "force:{}", version),
            other => write!(f, "{}", other.name()),
        }
    }
}

impl FromStr for Operation {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::from_name(s)
    }
}

/// Routes operations to the engine against one provider and one source
pub struct Dispatcher<P, S> {
    provider: P,
    source: S,
    options: EngineOptions,
}

impl<P: ConnectionProvider, S: MigrationSource> Dispatcher<P, S> {
    pub fn new(provider: P, source: S) -> Self {
        Self::with_options(provider, source, EngineOptions::default())
    }

    pub fn with_options(provider: P, source: S, options: EngineOptions) -> Self {
        Self {
            provider,
            source,
            options,
        }
    }

    /// Parse an operation name and run it
    pub fn run_named(&self, name: &str) -> Result<MigrationOutcome, MigrateError> {
        let operation = Operation::from_name(name)?;
        self.run(operation)
    }

    /// Run one operation; the connection and lock are released on return
    pub fn run(&self, operation: Operation) -> Result<MigrationOutcome, MigrateError> {
        info!(
            "Running '{}' against {}",
            operation,
            self.provider.describe()
        );

        let outcome = match operation {
            Operation::Apply => self.with_engine(|engine| engine.apply_pending()),
            Operation::StepUp => self.with_engine(|engine| engine.step_forward()),
            Operation::StepDown => self.with_engine(|engine| engine.step_backward()),
            Operation::Drop => self.with_engine(|engine| engine.drop_all()),
            Operation::Force(version) => self.with_engine(|engine| engine.force(version)),
            Operation::DropTrackingTable => self.drop_tracking_table(),
        }?;

        info!("{}", outcome);
        Ok(outcome)
    }

    /// Load the catalog, then hold the lock and a connection for the duration of `f`
    fn with_engine<F>(&self, f: F) -> Result<MigrationOutcome, MigrateError>
    where
        F: FnOnce(&MigrationEngine<'_>) -> Result<MigrationOutcome, MigrateError>,
    {
        let catalog = Catalog::load(&self.source)?;
        let _lock = self.provider.lock()?;
        let db = self.provider.connect()?;
        f(&MigrationEngine::with_options(&db, &catalog, self.options))
    }

    fn drop_tracking_table(&self) -> Result<MigrationOutcome, MigrateError> {
        let _lock = self.provider.lock()?;
        let db = self.provider.connect()?;
        VersionStore::new(&db.conn).drop_table()?;
        Ok(MigrationOutcome::TrackingTableDropped)
    }

    /// Report the current state without changing anything
    pub fn status(&self) -> Result<StatusReport, MigrateError> {
        let catalog = Catalog::load(&self.source)?;
        let db = self.provider.connect()?;
        MigrationEngine::with_options(&db, &catalog, self.options).status()
    }
}
