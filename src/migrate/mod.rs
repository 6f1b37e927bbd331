//! Schema migration engine
//!
//! - **source**: migration catalog and the sources it is loaded from
//! - **engine**: the `Clean`/`Dirty` state machine that applies and reverses scripts
//! - **dispatcher**: named operations routed onto engine calls
//! - **error**: the error taxonomy shared by all of the above
//!
//! # Usage
//!
//! ```rust,ignore
//! use schemigrate::migrate::{Dispatcher, DirectorySource, Operation};
//! use schemigrate::database::SqliteProvider;
//!
//! let provider = SqliteProvider::new(config.database.clone(), config.lock_timeout());
//! let source = DirectorySource::from_locator("file://./migrations")?;
//! let dispatcher = Dispatcher::new(provider, source);
//!
//! match dispatcher.run(Operation::Apply)? {
//!     outcome if outcome.is_no_change() => println!("up to date"),
//!     outcome => println!("{}", outcome),
//! }
//! ```

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod source;

pub use dispatcher::{Dispatcher, Operation};
pub use engine::{
    EngineOptions, MigrationEngine, MigrationOutcome, MigrationStatus, SchemaState, StatusReport,
};
pub use error::{Direction, MigrateError};
pub use source::{Catalog, DirectorySource, Migration, MigrationSource, StaticSource};

use crate::config::MigrateConfig;
use crate::database::core::SqliteProvider;

impl MigrateConfig {
    /// Engine options derived from the configured timeouts
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            statement_timeout: self.statement_timeout(),
            ..Default::default()
        }
    }

    /// Connection provider for the configured database
    pub fn provider(&self) -> SqliteProvider {
        SqliteProvider::new(self.database.clone(), self.lock_timeout())
    }

    /// Dispatcher for the configured database and the given migration locator
    pub fn dispatcher(
        &self,
        locator: &str,
    ) -> Result<Dispatcher<SqliteProvider, DirectorySource>, MigrateError> {
        let source = DirectorySource::from_locator(locator)?;
        Ok(Dispatcher::with_options(
            self.provider(),
            source,
            self.engine_options(),
        ))
    }
}

/// Drop the tracking table of the configured database
///
/// Needs no migration source, so it stays usable when the migration files
/// are missing or broken.
pub fn drop_tracking_table(config: &MigrateConfig) -> Result<MigrationOutcome, MigrateError> {
    Dispatcher::new(config.provider(), StaticSource::default()).run(Operation::DropTrackingTable)
}

/// Run one named operation against the configured database
///
/// `operation` takes the names understood by [`Operation::from_name`]; an
/// empty string applies all pending migrations. Unknown names fail before
/// any connection is opened. "Nothing to do" is reported as
/// [`MigrationOutcome::NoChange`], not as an error.
pub fn migrate(
    config: &MigrateConfig,
    operation: &str,
    locator: &str,
) -> Result<MigrationOutcome, MigrateError> {
    let operation = Operation::from_name(operation)?;
    config.dispatcher(locator)?.run(operation)
}
