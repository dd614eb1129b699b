//! Shared vocabulary types
//!
//! Datastore names, caller credentials and session options are used by
//! every component, so they live here rather than in any one of them.

use serde::{Deserialize, Serialize};

/// A named store of configuration or state data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    /// Persistent configuration applied at boot
    Startup,
    /// Active configuration and state data
    Running,
    /// Scratch view with explicit commit/discard
    Candidate,
}

impl Datastore {
    /// Stable index used for per-datastore session slots.
    pub fn index(&self) -> usize {
        match self {
            Datastore::Startup => 0,
            Datastore::Running => 1,
            Datastore::Candidate => 2,
        }
    }

    /// File suffix for the serialized tree of this datastore.
    pub fn suffix(&self) -> &'static str {
        match self {
            Datastore::Startup => "startup",
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
        }
    }

    /// The datastore a commit of this datastore targets.
    pub fn commit_target(&self) -> Datastore {
        match self {
            Datastore::Candidate => Datastore::Running,
            other => *other,
        }
    }

    /// All datastores, in slot order.
    pub fn all() -> [Datastore; 3] {
        [Datastore::Startup, Datastore::Running, Datastore::Candidate]
    }
}

/// Caller identity attached to a session.
///
/// The effective user governs file access on every datastore open; a
/// `None` uid means the process identity is used unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name of the caller, for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Effective uid to check file access with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
}

impl Credentials {
    pub fn process() -> Self {
        Self::default()
    }

    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            uid: None,
        }
    }
}

/// Per-session behaviour toggles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Hide state data; operational-data providers are never consulted
    #[serde(default)]
    pub config_only: bool,
}

/// How the embedder connects the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Long-running daemon: all installed modules are loaded at startup
    Daemon,
    /// Library use: modules are loaded lazily on first access
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_target() {
        assert_eq!(Datastore::Candidate.commit_target(), Datastore::Running);
        assert_eq!(Datastore::Startup.commit_target(), Datastore::Startup);
        assert_eq!(Datastore::Running.commit_target(), Datastore::Running);
    }

    #[test]
    fn test_slot_indexes_are_distinct() {
        let mut seen = [false; 3];
        for ds in Datastore::all() {
            assert!(!seen[ds.index()]);
            seen[ds.index()] = true;
        }
    }
}
