//! Access control shim
//!
//! Translates caller identity into file-access checks around datastore
//! I/O. When the process is privileged, checks run under the caller's
//! effective uid; the swap is strictly bracketed and failure paths always
//! restore the original identity.

use std::path::Path;

use nix::unistd::{access, geteuid, seteuid, AccessFlags, Uid};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Credentials;

/// Identity-aware file access checks.
pub struct AccessControl {
    /// Disabled for single-user (local) deployments
    enabled: bool,
}

/// Restores the original effective uid when dropped.
struct IdentityGuard {
    original: Option<Uid>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        if let Some(uid) = self.original.take() {
            // restoring the process identity must not be skipped on error paths
            let _ = seteuid(uid);
        }
    }
}

impl AccessControl {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Check that `credentials` may read (and optionally write) `path`.
    ///
    /// A missing file passes the check; creation is governed by the
    /// directory permissions probed at write time.
    pub fn check(&self, credentials: &Credentials, path: &Path, write: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if !path.exists() {
            return Ok(());
        }

        let _guard = self.assume_identity(credentials)?;

        let mut flags = AccessFlags::R_OK;
        if write {
            flags |= AccessFlags::W_OK;
        }
        match access(path, flags) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::EACCES) => Err(Error::new(
                ErrorKind::Unauthorized,
                format!(
                    "user '{}' is not permitted to {} '{}'",
                    credentials.username.as_deref().unwrap_or("?"),
                    if write { "write" } else { "read" },
                    path.display()
                ),
            )),
            Err(e) => Err(Error::io(format!(
                "access check on '{}' failed: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Switch the effective uid to the caller's, when possible.
    ///
    /// Only a privileged process can swap identities; otherwise checks
    /// run under the process identity, which is the caller itself in
    /// local mode.
    fn assume_identity(&self, credentials: &Credentials) -> Result<IdentityGuard> {
        let target = match credentials.uid {
            Some(uid) => Uid::from_raw(uid),
            None => return Ok(IdentityGuard { original: None }),
        };
        let current = geteuid();
        if target == current || !current.is_root() {
            return Ok(IdentityGuard { original: None });
        }
        seteuid(target).map_err(|e| {
            Error::new(
                ErrorKind::Unauthorized,
                format!("cannot assume uid {}: {}", target, e),
            )
        })?;
        Ok(IdentityGuard {
            original: Some(current),
        })
    }
}
