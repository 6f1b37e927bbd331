//! Advisory migration lock
//!
//! SQLite has no advisory lock primitive that survives across the several
//! transactions one migration operation uses, so writers serialize on a lock
//! file next to the database. The file is created with create-new semantics
//! and removed when the guard is dropped.

use crate::migrate::MigrateError;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock files older than this are considered abandoned
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// RAII guard for the migration lock file
#[derive(Debug)]
pub struct MigrationLock {
    path: PathBuf,
}

impl MigrationLock {
    /// Acquire the lock at `path`, waiting up to `timeout`
    pub fn acquire(path: &Path, timeout: Duration) -> Result<MigrationLock, MigrateError> {
        Self::acquire_with(path, timeout, write_owner)
    }

    fn acquire_with<F>(path: &Path, timeout: Duration, stamp: F) -> Result<MigrationLock, MigrateError>
    where
        F: Fn(&mut File) -> std::io::Result<()>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // the guard owns the file from here on, whatever happens next
                    let lock = MigrationLock {
                        path: path.to_path_buf(),
                    };
                    if let Err(e) = stamp(&mut file) {
                        warn!("Failed to write owner of migration lock {}: {}", path.display(), e);
                    }
                    debug!("Acquired migration lock {}", path.display());
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if remove_if_stale(path)? {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(MigrateError::Timeout {
                    what: format!("migration lock {}", path.display()),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release migration lock {}: {}", self.path.display(), e);
        }
    }
}

fn write_owner(file: &mut File) -> std::io::Result<()> {
    write!(
        file,
        "pid:{}\ntime:{}",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    )
}

fn lock_age(path: &Path) -> std::io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified.elapsed().unwrap_or_default())
}

/// Remove the lock file at `path` if it is stale
///
/// Returns `true` when the caller should retry creating the lock. The file is
/// first moved to a name private to this process and checked again there, so
/// two processes breaking the same stale lock never delete a fresh one.
fn remove_if_stale(path: &Path) -> Result<bool, MigrateError> {
    let age = match lock_age(path) {
        Ok(age) => age,
        // released between our create attempt and now
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if age <= STALE_LOCK_AGE {
        return Ok(false);
    }

    let claimed = PathBuf::from(format!("{}.stale.{}", path.display(), std::process::id()));
    match fs::rename(path, &claimed) {
        Ok(()) => {}
        // another process broke it first
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    }

    let claimed_age = lock_age(&claimed)?;
    if claimed_age <= STALE_LOCK_AGE {
        // we moved a lock someone just took; hand it back unless it was replaced
        if let Err(e) = fs::hard_link(&claimed, path) {
            warn!("Could not restore migration lock {}: {}", path.display(), e);
        }
        fs::remove_file(&claimed)?;
        return Ok(false);
    }

    warn!(
        "Found stale migration lock ({}h old), removing...",
        claimed_age.as_secs() / 3600
    );
    fs::remove_file(&claimed)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.migrate.lock");

        let lock1 = MigrationLock::acquire(&path, Duration::from_millis(0)).unwrap();
        assert!(path.exists());

        // Second lock should time out while the first is held
        let err = MigrationLock::acquire(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, MigrateError::Timeout { .. }));

        // After dropping first lock, second should succeed
        drop(lock1);
        assert!(!path.exists());
        let lock2 = MigrationLock::acquire(&path, Duration::from_millis(0)).unwrap();
        assert_eq!(lock2.path(), path.as_path());
    }

    #[test]
    fn test_lock_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.migrate.lock");

        let lock1 = MigrationLock::acquire(&path, Duration::from_millis(0)).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            drop(lock1);
        });

        let lock2 = MigrationLock::acquire(&path, Duration::from_secs(5));
        handle.join().unwrap();
        assert!(lock2.is_ok());
    }

    #[test]
    fn test_lock_released_when_owner_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.migrate.lock");

        let lock = MigrationLock::acquire_with(&path, Duration::from_millis(0), |_| {
            Err(std::io::Error::other("disk full"))
        })
        .unwrap();
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists());
        assert!(MigrationLock::acquire(&path, Duration::from_millis(0)).is_ok());
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.migrate.lock");
        fs::write(&path, "pid:1").unwrap();
        let old = std::time::SystemTime::now() - STALE_LOCK_AGE - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let lock = MigrationLock::acquire(&path, Duration::from_millis(0)).unwrap();
        assert!(lock_age(lock.path()).unwrap() < STALE_LOCK_AGE);

        // only the fresh lock remains, no claimed leftovers
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_fresh_lock_is_not_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.migrate.lock");
        let _held = MigrationLock::acquire(&path, Duration::from_millis(0)).unwrap();

        assert!(!remove_if_stale(&path).unwrap());
        assert!(path.exists());
    }
}
