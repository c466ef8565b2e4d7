//! Single-instance lock
//!
//! The daemon takes an exclusive, non-blocking `flock` on `daemon.lock`
//! before doing anything else. The kernel releases it when the process dies,
//! so a crash never leaves the lock held. The lock file is separate from the
//! state record and its contents are informational only.

use crate::error::LockError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A held instance lock; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    _file: Flock<File>,
    path: PathBuf,
}

impl InstanceLock {
    /// Try to take the lock without blocking
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Open {
                path: path.display().to_string(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::Open {
                path: path.display().to_string(),
                source: e,
            })?;

        let mut file = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            if errno == Errno::EWOULDBLOCK {
                LockError::AlreadyHeld
            } else {
                LockError::Flock(errno.into())
            }
        })?;

        // Record the holder for humans; failure here does not matter
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        tracing::debug!("Acquired instance lock {:?}", path);
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // `Flock` unlocks when the field drops right after this
        tracing::debug!("Released instance lock {:?}", self.path);
    }
}
