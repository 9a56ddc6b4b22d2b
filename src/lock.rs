use slog::{warn, Logger};
use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::Duration,
};

/// Lock files older than this trip a staleness warning: the run that wrote
/// them has most likely crashed without cleaning up.
const STALE_LOCK_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance appears to be running (lock file {0} exists)")]
    AlreadyLocked(String),
    #[error("creating lock file {1}: {0}")]
    Io(std::io::Error, String),
}

/// A file-based mutex preventing two runs from overlapping. The lock file
/// records the owning pid and is removed when the lock is dropped. A stale
/// lock (older than 24 hours) is warned about but never stolen; the
/// operator decides whether to remove it.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path, logger: &Logger) -> Result<InstanceLock, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(InstanceLock {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(age) = lock_age(path) {
                    if age > STALE_LOCK_AGE {
                        warn!(
                            logger, "existing lock file looks stale";
                            "path" => path.display().to_string(),
                            "age_secs" => age.as_secs()
                        );
                    }
                }
                Err(LockError::AlreadyLocked(path.display().to_string()))
            }
            Err(e) => Err(LockError::Io(e, path.display().to_string())),
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    std::time::SystemTime::now().duration_since(modified).ok()
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use assert_matches::assert_matches;

    #[test]
    fn second_acquire_fails_while_held() {
        let logger = setup_test_logging();
        let tempdir = tempfile::TempDir::new().unwrap();
        let path = tempdir.path().join("mdetl.lock");

        let _held = InstanceLock::acquire(&path, &logger).unwrap();
        assert_matches!(
            InstanceLock::acquire(&path, &logger).unwrap_err(),
            LockError::AlreadyLocked(_)
        );
    }

    #[test]
    fn drop_releases_the_lock() {
        let logger = setup_test_logging();
        let tempdir = tempfile::TempDir::new().unwrap();
        let path = tempdir.path().join("mdetl.lock");

        {
            let _held = InstanceLock::acquire(&path, &logger).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        let _reacquired = InstanceLock::acquire(&path, &logger).unwrap();
    }

    #[test]
    fn lock_file_records_the_pid() {
        let logger = setup_test_logging();
        let tempdir = tempfile::TempDir::new().unwrap();
        let path = tempdir.path().join("mdetl.lock");

        let _held = InstanceLock::acquire(&path, &logger).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
