// Process lock - two overlapping runs must never write the same working tree

use crate::error::{Result, SnapshotError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_LOCK_NAME: &str = "spotify-snapshot";

/// Held for the duration of a backup run. Unlocks and removes the file on drop.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Takes `<dir>/.<name>.lock` without waiting. A held lock is an error, not a queue.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!(".{}.lock", name));

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(SnapshotError::LockHeld { path });
        }

        // PID is informational only, fs2 owns the actual exclusion
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        debug!("Acquired process lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove lock file {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp_dir = TempDir::new().unwrap();

        let first = ProcessLock::acquire(temp_dir.path(), "snap").unwrap();
        let second = ProcessLock::acquire(temp_dir.path(), "snap");
        assert!(matches!(second, Err(SnapshotError::LockHeld { .. })));

        let contents = std::fs::read_to_string(first.path()).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn test_drop_releases_and_removes() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".snap.lock");

        {
            let _lock = ProcessLock::acquire(temp_dir.path(), "snap").unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());

        // Free to take again
        let _again = ProcessLock::acquire(temp_dir.path(), "snap").unwrap();
    }
}
