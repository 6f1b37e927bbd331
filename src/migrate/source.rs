//! Migration sources and the validated catalog
//!
//! A source lists migrations; the [`Catalog`] orders and validates them once at
//! load time and is never mutated afterwards.
//!
//! # Directory Layout
//!
//! [`DirectorySource`] reads files named `{version}_{title}.up.sql` and
//! `{version}_{title}.down.sql`:
//!
//! ```text
//! migrations/
//! ├── 1_create_users.up.sql
//! ├── 1_create_users.down.sql
//! ├── 2_add_email.up.sql
//! └── 2_add_email.down.sql
//! ```
//!
//! A migration without a `.down.sql` file is irreversible.

use crate::migrate::error::Direction;
use crate::migrate::MigrateError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A versioned pair of forward/reverse schema scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up: String,
    pub down: Option<String>,
}

impl Migration {
    pub fn new(version: i64, name: &str, up: &str, down: Option<&str>) -> Self {
        Self {
            version,
            name: name.to_string(),
            up: up.to_string(),
            down: down.map(|s| s.to_string()),
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Anything that can list the available migrations
///
/// Implementations must return the same list every time within one process run.
pub trait MigrationSource {
    fn list(&self) -> Result<Vec<Migration>, MigrateError>;
}

/// Migrations compiled into the binary
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    migrations: Vec<Migration>,
}

impl StaticSource {
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for StaticSource {
    fn list(&self) -> Result<Vec<Migration>, MigrateError> {
        Ok(self.migrations.clone())
    }
}

/// Migrations stored as `.up.sql` / `.down.sql` files in a directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Build a source from a locator: a plain path or a `file://` URL
    pub fn from_locator(locator: &str) -> Result<Self, MigrateError> {
        if let Some(path) = locator.strip_prefix("file://") {
            return Ok(Self::new(path));
        }
        match locator.split_once("://") {
            Some((scheme, _)) => Err(MigrateError::InvalidCatalog(format!(
                "unsupported migration source scheme '{}'",
                scheme
            ))),
            None => Ok(Self::new(locator)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

struct Partial {
    name: String,
    up: Option<String>,
    down: Option<String>,
}

impl MigrationSource for DirectorySource {
    fn list(&self) -> Result<Vec<Migration>, MigrateError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::InvalidCatalog(format!(
                "cannot read migration directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut partials: BTreeMap<i64, Partial> = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some((version, name, direction)) = parse_file_name(&file_name)? else {
                debug!("Ignoring non-migration file {}", file_name);
                continue;
            };

            let script = fs::read_to_string(entry.path())?;
            let partial = partials.entry(version).or_insert_with(|| Partial {
                name: name.clone(),
                up: None,
                down: None,
            });
            if partial.name != name {
                return Err(MigrateError::InvalidCatalog(format!(
                    "version {} is used by both '{}' and '{}'",
                    version, partial.name, name
                )));
            }

            let slot = match direction {
                Direction::Up => &mut partial.up,
                Direction::Down => &mut partial.down,
            };
            if slot.is_some() {
                return Err(MigrateError::InvalidCatalog(format!(
                    "duplicate {} script for version {}",
                    direction, version
                )));
            }
            *slot = Some(script);
        }

        partials
            .into_iter()
            .map(|(version, p)| match p.up {
                Some(up) => Ok(Migration {
                    version,
                    name: p.name,
                    up,
                    down: p.down,
                }),
                None => Err(MigrateError::InvalidCatalog(format!(
                    "version {} ({}) has a down script but no up script",
                    version, p.name
                ))),
            })
            .collect()
    }
}

/// Split `{version}_{title}.{up|down}.sql` into its parts
///
/// Returns `None` for files that are not migration scripts at all.
fn parse_file_name(file_name: &str) -> Result<Option<(i64, String, Direction)>, MigrateError> {
    let (stem, direction) = if let Some(stem) = file_name.strip_suffix(".up.sql") {
        (stem, Direction::Up)
    } else if let Some(stem) = file_name.strip_suffix(".down.sql") {
        (stem, Direction::Down)
    } else {
        return Ok(None);
    };

    let (version, name) = match stem.split_once('_') {
        Some((v, n)) => (v, n),
        None => (stem, ""),
    };
    let version = version.parse::<i64>().map_err(|_| {
        MigrateError::InvalidCatalog(format!(
            "cannot parse version from migration file '{}'",
            file_name
        ))
    })?;

    Ok(Some((version, name.to_string(), direction)))
}

/// The fixed, ordered collection of known migrations
///
/// Versions are strictly increasing and positive. Gaps are allowed.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    migrations: Vec<Migration>,
}

impl Catalog {
    /// Load and validate the migrations of a source
    pub fn load(source: &dyn MigrationSource) -> Result<Self, MigrateError> {
        Self::new(source.list()?)
    }

    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrateError> {
        migrations.sort_by_key(|m| m.version);

        for m in &migrations {
            if m.version <= 0 {
                return Err(MigrateError::InvalidCatalog(format!(
                    "migration '{}' has non-positive version {}",
                    m.name, m.version
                )));
            }
        }
        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrateError::InvalidCatalog(format!(
                    "duplicate migration version {}",
                    pair[0].version
                )));
            }
        }

        Ok(Self { migrations })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|i| &self.migrations[i])
    }

    pub fn contains(&self, version: i64) -> bool {
        self.get(version).is_some()
    }

    pub fn last_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version)
    }

    /// All migrations with a version greater than `version`, ascending
    pub fn pending_after(&self, version: i64) -> &[Migration] {
        let start = self.migrations.partition_point(|m| m.version <= version);
        &self.migrations[start..]
    }

    /// Version of the migration immediately preceding `version`, 0 if none
    pub fn previous_version(&self, version: i64) -> i64 {
        let idx = self.migrations.partition_point(|m| m.version < version);
        match idx {
            0 => 0,
            i => self.migrations[i - 1].version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("1_create_users.up.sql").unwrap(),
            Some((1, "create_users".to_string(), Direction::Up))
        );
        assert_eq!(
            parse_file_name("20240101120000_add_index.down.sql").unwrap(),
            Some((20240101120000, "add_index".to_string(), Direction::Down))
        );
        assert_eq!(parse_file_name("README.md").unwrap(), None);
        assert!(parse_file_name("abc_users.up.sql").is_err());
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2_add_email.up.sql", "ALTER TABLE users ADD COLUMN email TEXT;");
        write(dir.path(), "1_create_users.up.sql", "CREATE TABLE users (id INTEGER);");
        write(dir.path(), "1_create_users.down.sql", "DROP TABLE users;");
        write(dir.path(), "notes.txt", "ignored");

        let source = DirectorySource::new(dir.path());
        let catalog = Catalog::load(&source).unwrap();

        assert_eq!(catalog.len(), 2);
        let first = catalog.get(1).unwrap();
        assert_eq!(first.name, "create_users");
        assert!(first.is_reversible());
        assert!(!catalog.get(2).unwrap().is_reversible());
    }

    #[test]
    fn test_directory_source_rejects_orphan_down() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "3_orphan.down.sql", "DROP TABLE x;");

        let err = DirectorySource::new(dir.path()).list().unwrap_err();
        assert!(matches!(err, MigrateError::InvalidCatalog(_)));
    }

    #[test]
    fn test_directory_source_rejects_conflicting_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1_users.up.sql", "SELECT 1;");
        write(dir.path(), "1_accounts.down.sql", "SELECT 1;");

        let err = DirectorySource::new(dir.path()).list().unwrap_err();
        assert!(err.to_string().contains("version 1"));
    }

    #[test]
    fn test_from_locator() {
        let src = DirectorySource::from_locator("file://./db/migrations").unwrap();
        assert_eq!(src.dir(), Path::new("./db/migrations"));

        let src = DirectorySource::from_locator("db/migrations").unwrap();
        assert_eq!(src.dir(), Path::new("db/migrations"));

        assert!(DirectorySource::from_locator("s3://bucket/migrations").is_err());
    }

    #[test]
    fn test_catalog_rejects_duplicates_and_zero() {
        let dup = vec![
            Migration::new(1, "a", "SELECT 1;", None),
            Migration::new(1, "b", "SELECT 1;", None),
        ];
        assert!(matches!(
            Catalog::new(dup),
            Err(MigrateError::InvalidCatalog(_))
        ));

        let zero = vec![Migration::new(0, "zero", "SELECT 1;", None)];
        assert!(Catalog::new(zero).is_err());
    }

    #[test]
    fn test_catalog_navigation_with_gaps() {
        let catalog = Catalog::new(vec![
            Migration::new(10, "c", "SELECT 1;", None),
            Migration::new(1, "a", "SELECT 1;", None),
            Migration::new(5, "b", "SELECT 1;", None),
        ])
        .unwrap();

        let versions: Vec<i64> = catalog.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 5, 10]);

        let pending: Vec<i64> = catalog.pending_after(1).iter().map(|m| m.version).collect();
        assert_eq!(pending, vec![5, 10]);
        assert!(catalog.pending_after(10).is_empty());
        assert_eq!(catalog.pending_after(0).len(), 3);

        assert_eq!(catalog.previous_version(10), 5);
        assert_eq!(catalog.previous_version(5), 1);
        assert_eq!(catalog.previous_version(1), 0);
        assert_eq!(catalog.last_version(), Some(10));
        assert!(!catalog.contains(3));
    }
}
