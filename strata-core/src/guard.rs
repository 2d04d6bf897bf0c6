//! Process-wide lock and umask for mutating operations
//!
//! A [`MutationGuard`] holds an exclusive file lock on `<storage>/.strata.lock`
//! and the configured umask for as long as it lives. Dropping it restores
//! the previous umask and releases the lock.

use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::LockError;

#[derive(Debug)]
pub struct MutationGuard {
    file: File,
    path: PathBuf,
    previous_umask: libc::mode_t,
}

impl MutationGuard {
    /// Take the lock without waiting and apply `umask`
    pub fn acquire(lock_path: &Path, umask: u32) -> Result<Self, LockError> {
        let io_error = |source| LockError::Io {
            path: lock_path.to_path_buf(),
            source,
        };

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(io_error)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(LockError::Busy {
                    path: lock_path.to_path_buf(),
                })
            }
            Err(err) => return Err(io_error(err)),
        }

        // SAFETY: umask only swaps the process file creation mask
        let previous_umask = unsafe { libc::umask(umask as libc::mode_t) };
        debug!(
            "Acquired {} (umask {:04o}, previous {:04o})",
            lock_path.display(),
            umask,
            previous_umask
        );

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
            previous_umask,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        // SAFETY: umask only swaps the process file creation mask
        unsafe {
            libc::umask(self.previous_umask);
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed: {}", self.path.display(), e);
        }
        debug!("Released {}", self.path.display());
    }
}
