use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::datatype::Error;

/// An advisory exclusive lock on `uptane.update_lock_file`, gating entry
/// to the `Installing` state. Held for the lifetime of this guard and
/// released (best-effort) on drop, so every exit path — including a
/// panic unwinding through the cycle thread — releases it.
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Attempts to acquire the lock without blocking. Returns `Ok(None)`
    /// if another process already holds it — the caller's contract is to
    /// skip the install attempt and return to `Idle`, not to wait.
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Option<UpdateLock>, Error> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(UpdateLock { file, path })),
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(Error::Lock(format!("{}: {}", path.display(), err))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            warn!("failed to release update lock {}: {}", self.path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_is_blocked_while_first_holds_lock() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("update.lock");

        let first = UpdateLock::try_acquire(&path).expect("first acquire").expect("should succeed");
        let second = UpdateLock::try_acquire(&path).expect("second acquire attempt");
        assert!(second.is_none());

        drop(first);
        let third = UpdateLock::try_acquire(&path).expect("third acquire attempt");
        assert!(third.is_some());
    }

    #[test]
    fn acquire_creates_parent_directories() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("update.lock");
        let lock = UpdateLock::try_acquire(&path).expect("acquire").expect("should succeed");
        assert!(lock.path().exists());
    }
}
