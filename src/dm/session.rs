//! Sessions and per-session working copies
//!
//! A session owns, per datastore, a set of lazily created `DataInfo`
//! working copies and the op-log of edits since the last commit or
//! discard. For every `DataInfo`, `modified == true` implies the op-log
//! of that `(session, datastore)` is non-empty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Credentials, Datastore, SessionOptions};
use crate::core::value::Value;
use crate::yang::tree::{DataTree, MovePosition};

/// Per-session, per-module working copy.
#[derive(Debug, Clone)]
pub struct DataInfo {
    /// Module name
    pub module: String,
    /// The working tree
    pub tree: DataTree,
    /// True once an edit touched this copy
    pub modified: bool,
    /// Edits are rejected on read-only copies
    pub read_only: bool,
    /// Version counter of the file this copy was loaded from
    pub file_version: u64,
    /// Filesystem mtime observed at load time
    pub mtime: Option<SystemTime>,
}

/// Option bits accepted by the edit operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOptions {
    /// Keep the default flag on the written value
    #[serde(default)]
    pub default: bool,
    /// Do not create missing ancestors; do not delete non-empty interiors
    #[serde(default)]
    pub non_recursive: bool,
    /// Require the target to be absent (set) or present (delete)
    #[serde(default)]
    pub strict: bool,
}

/// The mutation part of a logged edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EditOperation {
    Set {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    Delete {
        path: String,
    },
    Move {
        path: String,
        position: MovePosition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relative: Option<String>,
    },
}

impl EditOperation {
    /// Path the operation targets.
    pub fn path(&self) -> &str {
        match self {
            EditOperation::Set { path, .. } => path,
            EditOperation::Delete { path } => path,
            EditOperation::Move { path, .. } => path,
        }
    }

    /// Module qualifier of the target path.
    pub fn module(&self) -> Option<&str> {
        let path = self.path();
        let rest = path.strip_prefix('/')?;
        rest.split_once(':').map(|(m, _)| m)
    }
}

/// One logged edit, alive until commit succeeds or discard is issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOp {
    pub operation: EditOperation,
    pub options: EditOptions,
    /// Set when replaying the op against a fresh base failed
    #[serde(default)]
    pub has_error: bool,
}

/// Per-datastore slot of a session.
#[derive(Debug, Default)]
pub struct DatastoreSlot {
    /// Working copies keyed by module name
    pub data: HashMap<String, DataInfo>,
    /// Op-log since last commit or discard
    pub ops: Vec<EditOp>,
    /// Lock files held by this session in this datastore
    pub locked_files: Vec<PathBuf>,
    /// True when the whole-datastore lock is held
    pub holds_datastore_lock: bool,
}

/// A data-manager session.
#[derive(Debug)]
pub struct Session {
    /// Session id, unique within the runtime
    pub id: u32,
    /// Caller identity used for file access checks
    pub credentials: Credentials,
    /// Datastore the session currently operates on
    pub datastore: Datastore,
    /// Behaviour toggles
    pub options: SessionOptions,
    /// Commit id binding of a notification session
    pub commit_id: Option<u32>,
    /// Errors of the most recent operation
    pub errors: Vec<Error>,
    slots: [DatastoreSlot; 3],
}

impl Session {
    pub fn new(id: u32, credentials: Credentials, datastore: Datastore) -> Self {
        Self {
            id,
            credentials,
            datastore,
            options: SessionOptions::default(),
            commit_id: None,
            errors: Vec::new(),
            slots: Default::default(),
        }
    }

    /// A read-only notification session bound to a commit id.
    pub fn notification(id: u32, credentials: Credentials, commit_id: u32) -> Self {
        let mut session = Self::new(id, credentials, Datastore::Running);
        session.commit_id = Some(commit_id);
        session
    }

    pub fn is_notification(&self) -> bool {
        self.commit_id.is_some()
    }

    /// Slot of the current datastore.
    pub fn slot(&self) -> &DatastoreSlot {
        &self.slots[self.datastore.index()]
    }

    /// Mutable slot of the current datastore.
    pub fn slot_mut(&mut self) -> &mut DatastoreSlot {
        &mut self.slots[self.datastore.index()]
    }

    /// Slot of an explicit datastore.
    pub fn slot_of(&self, datastore: Datastore) -> &DatastoreSlot {
        &self.slots[datastore.index()]
    }

    /// Mutable slot of an explicit datastore.
    pub fn slot_of_mut(&mut self, datastore: Datastore) -> &mut DatastoreSlot {
        &mut self.slots[datastore.index()]
    }

    /// Switch the current datastore, dropping its working copies.
    pub fn switch_datastore(&mut self, datastore: Datastore) {
        if self.datastore != datastore {
            let slot = self.slot_mut();
            slot.data.clear();
            slot.ops.clear();
            self.datastore = datastore;
        }
    }

    /// Drop working copies and op-log of the current datastore.
    pub fn discard(&mut self) {
        let slot = self.slot_mut();
        slot.data.clear();
        slot.ops.clear();
    }

    /// Append an edit to the current op-log.
    pub fn log_op(&mut self, operation: EditOperation, options: EditOptions) {
        self.slot_mut().ops.push(EditOp {
            operation,
            options,
            has_error: false,
        });
    }

    /// Clear the modified flag on every working copy of the current
    /// datastore and empty the op-log; used after a successful commit.
    pub fn mark_committed(&mut self) {
        let slot = self.slot_mut();
        for info in slot.data.values_mut() {
            info.modified = false;
        }
        slot.ops.clear();
    }

    /// Drop ops flagged with errors during a failed replay.
    pub fn remove_operations_with_error(&mut self) {
        self.slot_mut().ops.retain(|op| !op.has_error);
    }

    /// Clear the error slate; called at the start of every dispatch.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Record an error for `get_last_error`.
    pub fn report_error(&mut self, error: &Error) {
        self.errors.push(error.clone());
    }

    /// Modules with a modified working copy in the current datastore.
    pub fn modified_modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self
            .slot()
            .data
            .values()
            .filter(|i| i.modified)
            .map(|i| i.module.clone())
            .collect();
        modules.sort();
        modules
    }
}
