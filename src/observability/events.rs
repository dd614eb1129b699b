//! Observable events
//!
//! Every log line names one of these events. Keeping the vocabulary
//! closed makes the log greppable and the emitting sites auditable.

use std::fmt;

/// Observable events in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Runtime initialization begins
    InitStart,
    /// Runtime is ready to serve
    InitComplete,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,

    // Schema catalog
    /// Module schema loaded
    ModuleLoaded,
    /// Module installed
    ModuleInstalled,
    /// Module uninstalled (soft)
    ModuleUninstalled,
    /// Feature toggled
    FeatureToggled,

    // Sessions
    /// Session started
    SessionStart,
    /// Session stopped
    SessionStop,
    /// Session datastore switched
    SessionSwitchDs,
    /// Session working copies refreshed
    SessionRefresh,

    // Locking
    /// Module or datastore lock acquired
    LockAcquired,
    /// Module or datastore lock released
    LockReleased,
    /// Lock request denied
    LockDenied,

    // Commit pipeline
    /// Commit started
    CommitStart,
    /// Commit validation failed
    CommitValidationFailed,
    /// A verifier rejected the commit
    CommitVetoed,
    /// Datastore files written
    CommitWritten,
    /// Commit finished and published
    CommitComplete,
    /// Commit context released
    CommitReleased,

    // Notifications
    /// Subscription registered
    Subscribed,
    /// Subscription removed
    Unsubscribed,
    /// Apply notification delivered
    ApplyNotified,

    // Request processing
    /// Request rejected before dispatch
    RequestRejected,
    /// Request suspended waiting for operational data
    OperDataWait,
    /// Operational data wait timed out
    OperDataTimeout,
    /// Request resumed with loaded data
    OperDataLoaded,

    // Datastore files
    /// Datastore file checksum mismatch
    FileCorrupt,
    /// Datastore file write failed
    FileWriteFailed,
}

impl Event {
    /// Stable event name used as the `event` log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::InitStart => "init_start",
            Event::InitComplete => "init_complete",
            Event::ShutdownStart => "shutdown_start",
            Event::ShutdownComplete => "shutdown_complete",
            Event::ModuleLoaded => "module_loaded",
            Event::ModuleInstalled => "module_installed",
            Event::ModuleUninstalled => "module_uninstalled",
            Event::FeatureToggled => "feature_toggled",
            Event::SessionStart => "session_start",
            Event::SessionStop => "session_stop",
            Event::SessionSwitchDs => "session_switch_ds",
            Event::SessionRefresh => "session_refresh",
            Event::LockAcquired => "lock_acquired",
            Event::LockReleased => "lock_released",
            Event::LockDenied => "lock_denied",
            Event::CommitStart => "commit_start",
            Event::CommitValidationFailed => "commit_validation_failed",
            Event::CommitVetoed => "commit_vetoed",
            Event::CommitWritten => "commit_written",
            Event::CommitComplete => "commit_complete",
            Event::CommitReleased => "commit_released",
            Event::Subscribed => "subscribed",
            Event::Unsubscribed => "unsubscribed",
            Event::ApplyNotified => "apply_notified",
            Event::RequestRejected => "request_rejected",
            Event::OperDataWait => "oper_data_wait",
            Event::OperDataTimeout => "oper_data_timeout",
            Event::OperDataLoaded => "oper_data_loaded",
            Event::FileCorrupt => "file_corrupt",
            Event::FileWriteFailed => "file_write_failed",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_snake_case() {
        for event in [Event::InitStart, Event::CommitVetoed, Event::OperDataTimeout] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
