//! Error taxonomy for migration operations

use std::fmt;

/// Direction a migration script runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("unable to connect to DB: {0}")]
    ConnectionFailed(String),

    #[error("version store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error(
        "database is dirty at version {version}{}; fix the schema manually and run `force <VERSION>`",
        .migration.map(|m| format!(" (migration {} did not complete)", m)).unwrap_or_default()
    )]
    DirtyStateBlocksOperation { version: i64, migration: Option<i64> },

    #[error("migration {version} has no down script")]
    NoDownScript { version: i64 },

    #[error("no applied migration to reverse")]
    NothingToReverse,

    #[error("invalid operation '{0}'")]
    InvalidOperation(String),

    #[error("migration {version}/{direction} {name} failed: {source}")]
    ScriptExecutionFailed {
        version: i64,
        name: String,
        direction: Direction,
        #[source]
        source: rusqlite::Error,
    },

    #[error("timed out waiting for {what}")]
    Timeout { what: String },

    #[error("invalid migration catalog: {0}")]
    InvalidCatalog(String),

    #[error("version {0} does not exist in the migration catalog")]
    UnknownVersion(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Returns true if the sqlite error was raised by an interrupted statement
pub(crate) fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::OperationInterrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::DirtyStateBlocksOperation {
            version: 3,
            migration: Some(4),
        };
        let msg = err.to_string();
        assert!(msg.contains("version 3"));
        assert!(msg.contains("migration 4"));

        let err = MigrateError::DirtyStateBlocksOperation {
            version: 3,
            migration: None,
        };
        assert!(!err.to_string().contains("migration"));

        let err = MigrateError::NoDownScript { version: 7 };
        assert_eq!(err.to_string(), "migration 7 has no down script");

        let err = MigrateError::InvalidOperation("sideways".to_string());
        assert_eq!(err.to_string(), "invalid operation 'sideways'");
    }
}
