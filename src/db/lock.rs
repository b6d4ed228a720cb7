use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use log::debug;

/// Exclusive advisory lock on the data directory. Held for as long as a
/// process may write the session log; released when dropped.
///
/// The lock file itself is left in place so a second process never races
/// on creating it.
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Fails immediately if another process holds the lock.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        if let Err(err) = file.try_lock_exclusive() {
            bail!(
                "another logon process is using {} ({err})",
                path.parent().unwrap_or(path).display()
            );
        }

        debug!("Acquired data directory lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("Failed to release {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logon.lock");

        let first = DataDirLock::acquire(&path).unwrap();
        let err = DataDirLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("another logon process"));

        drop(first);
        let again = DataDirLock::acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }
}
