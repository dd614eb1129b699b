//! Cooperative lock set
//!
//! Maps absolute lock-file paths to their in-process holder. Acquisition
//! opens (creating if absent) the lock file, takes an OS advisory lock
//! and records the holder; contention inside the process is answered from
//! the table, contention across processes by the advisory lock.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::core::error::{Error, ErrorKind, Result};

/// Lock mode requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockEntry {
    lock: Flock<File>,
    holder: u32,
    mode: LockMode,
}

/// In-process table of held lock files.
pub struct LockSet {
    entries: Mutex<HashMap<PathBuf, LockEntry>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LockSet {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a lock file for `holder`.
    ///
    /// Returns `true` when the lock was newly acquired and `false` when
    /// the holder already held it. `Locked` is reported when another
    /// session holds the file, `Unauthorized` when the file cannot be
    /// opened for writing.
    pub fn lock(&self, path: &Path, holder: u32, mode: LockMode, blocking: bool) -> Result<bool> {
        let mut entries = guard(&self.entries);
        if let Some(existing) = entries.get(path) {
            if existing.holder == holder {
                return Ok(false);
            }
            return Err(Error::locked(format!(
                "'{}' is locked by session {}",
                path.display(),
                existing.holder
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => Error::new(
                    ErrorKind::Unauthorized,
                    format!("no permission to open lock file '{}'", path.display()),
                ),
                _ => Error::io(format!("cannot open lock file '{}': {}", path.display(), e)),
            })?;

        let arg = match (mode, blocking) {
            (LockMode::Exclusive, false) => FlockArg::LockExclusiveNonblock,
            (LockMode::Exclusive, true) => FlockArg::LockExclusive,
            (LockMode::Shared, false) => FlockArg::LockSharedNonblock,
            (LockMode::Shared, true) => FlockArg::LockShared,
        };

        let lock = match Flock::lock(file, arg) {
            Ok(lock) => lock,
            Err((_, Errno::EAGAIN)) => {
                return Err(Error::locked(format!(
                    "'{}' is locked by another process",
                    path.display()
                )))
            }
            Err((_, errno)) => {
                return Err(Error::io(format!(
                    "advisory lock on '{}' failed: {}",
                    path.display(),
                    errno
                )))
            }
        };

        entries.insert(
            path.to_path_buf(),
            LockEntry {
                lock,
                holder,
                mode,
            },
        );
        Ok(true)
    }

    /// Release a lock held by `holder`.
    pub fn unlock(&self, path: &Path, holder: u32) -> Result<()> {
        let mut entries = guard(&self.entries);
        match entries.get(path) {
            Some(entry) if entry.holder == holder => {
                entries.remove(path);
                Ok(())
            }
            Some(_) => Err(Error::locked(format!(
                "'{}' is not held by session {}",
                path.display(),
                holder
            ))),
            None => Err(Error::not_found(format!(
                "'{}' is not locked",
                path.display()
            ))),
        }
    }

    /// Drop every lock held by a session. Returns the released paths.
    pub fn release_session(&self, holder: u32) -> Vec<PathBuf> {
        let mut entries = guard(&self.entries);
        let paths: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, e)| e.holder == holder)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &paths {
            entries.remove(path);
        }
        paths
    }

    /// Current holder of a lock file, if any.
    pub fn holder_of(&self, path: &Path) -> Option<(u32, LockMode)> {
        let entries = guard(&self.entries);
        entries.get(path).map(|e| (e.holder, e.mode))
    }
}

impl Default for LockSet {
    fn default() -> Self {
        Self::new()
    }
}
