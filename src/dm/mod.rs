//! Data manager
//!
//! Per-session working copies, the edit op-log, validation, the commit
//! pipeline, diff generation and enable-running management. The data
//! manager never touches process globals; the owning runtime wires it to
//! the catalog, lock set, datastore files and persistence manager.

pub mod commit;
pub mod commit_context;
pub mod edit;
pub mod procedures;
pub mod session;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::catalog::{NodeState, SchemaCatalog};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Credentials, Datastore};
use crate::core::value::{Item, Value};
use crate::datastore::{AccessControl, DataFiles};
use crate::locks::{LockMode, LockSet};
use crate::observability::{self, Event};
use crate::pm::PersistenceManager;
use crate::yang::path::XPath;
use crate::yang::tree::MovePosition;
use crate::yang::validate::validate_tree;

pub use commit_context::{ChangeOp, ChangeRecord, CommitContext, CommitContextStore};
pub use session::{DataInfo, DatastoreSlot, EditOp, EditOperation, EditOptions, Session};

/// The data manager.
pub struct DataManager {
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) files: DataFiles,
    pub(crate) locks: Arc<LockSet>,
    pub(crate) access: AccessControl,
    pub(crate) pm: Arc<dyn PersistenceManager>,
    pub(crate) commit_store: CommitContextStore,
    pub(crate) last_commit: Mutex<Option<SystemTime>>,
    pub(crate) commit_stamp: AtomicU64,
    next_session_id: AtomicU32,
}

impl DataManager {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        files: DataFiles,
        locks: Arc<LockSet>,
        access: AccessControl,
        pm: Arc<dyn PersistenceManager>,
    ) -> Self {
        Self {
            catalog,
            files,
            locks,
            access,
            pm,
            commit_store: CommitContextStore::new(),
            last_commit: Mutex::new(None),
            commit_stamp: AtomicU64::new(0),
            next_session_id: AtomicU32::new(1),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn commit_store(&self) -> &CommitContextStore {
        &self.commit_store
    }

    /// Start a user session.
    pub fn session_start(&self, credentials: Credentials, datastore: Datastore) -> Session {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        observability::info(
            Event::SessionStart,
            &[("session", &id.to_string()), ("datastore", datastore.suffix())],
        );
        Session::new(id, credentials, datastore)
    }

    /// Start a notification session bound to a live commit id.
    pub fn notification_session_start(
        &self,
        credentials: Credentials,
        commit_id: u32,
    ) -> Result<Session> {
        if !self.commit_store.contains(commit_id) {
            return Err(Error::not_found(format!(
                "commit {} is not available",
                commit_id
            )));
        }
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        Ok(Session::notification(id, credentials, commit_id))
    }

    /// Stop a session, releasing every lock it holds.
    pub fn session_stop(&self, session: &mut Session) {
        self.locks.release_session(session.id);
        for datastore in Datastore::all() {
            let slot = session.slot_of_mut(datastore);
            slot.data.clear();
            slot.ops.clear();
            slot.locked_files.clear();
            slot.holds_datastore_lock = false;
        }
        observability::info(Event::SessionStop, &[("session", &session.id.to_string())]);
    }

    /// Switch the session's datastore view.
    pub fn session_switch_ds(&self, session: &mut Session, datastore: Datastore) {
        session.switch_datastore(datastore);
        observability::info(
            Event::SessionSwitchDs,
            &[
                ("session", &session.id.to_string()),
                ("datastore", datastore.suffix()),
            ],
        );
    }

    /// Whether a module counts as enabled in the running datastore.
    pub fn module_enabled_running(&self, module: &str) -> bool {
        self.catalog.has_enabled_subtree(module)
    }

    /// The session's working copy of a module, loaded on first touch.
    ///
    /// Candidate loads strip subtrees whose root schema nodes are not
    /// enabled, then reinstate default nodes. `NotFound` for unknown or
    /// disabled modules, `Unauthorized` on file ACL failure.
    pub fn data_info<'a>(
        &self,
        session: &'a mut Session,
        module: &str,
    ) -> Result<&'a mut DataInfo> {
        if !self.catalog.is_enabled(module) {
            // unknown module in local mode may still be loadable
            self.catalog
                .get(module)
                .map_err(|_| Error::not_found(format!("module '{}' is not available", module)))?;
        }

        if !session.slot().data.contains_key(module) {
            let info = self.load_data_info(session, module)?;
            session.slot_mut().data.insert(module.to_string(), info);
        }
        session
            .slot_mut()
            .data
            .get_mut(module)
            .ok_or_else(|| Error::internal("working copy vanished"))
    }

    fn load_data_info(&self, session: &Session, module: &str) -> Result<DataInfo> {
        let schema = self.catalog.get(module)?;

        // notification sessions copy the post tree out of the commit context
        if let Some(commit_id) = session.commit_id {
            let ctx = self
                .commit_store
                .get(commit_id)
                .ok_or_else(|| Error::not_found(format!("commit {} is not available", commit_id)))?;
            let tree = ctx
                .post_trees
                .get(module)
                .cloned()
                .unwrap_or_else(|| crate::yang::tree::DataTree::empty(module));
            return Ok(DataInfo {
                module: module.to_string(),
                tree,
                modified: false,
                read_only: true,
                file_version: 0,
                mtime: None,
            });
        }

        let datastore = session.datastore;
        let source = match datastore {
            Datastore::Candidate => Datastore::Candidate,
            other => other,
        };
        let path = self.files.data_path(module, source);
        self.access.check(&session.credentials, &path, false)?;

        let stored = match datastore {
            Datastore::Candidate => match self.files.load(module, Datastore::Candidate)? {
                Some(stored) => stored,
                // a fresh candidate starts as a copy of running
                None => {
                    let running = self.files.data_path(module, Datastore::Running);
                    self.access.check(&session.credentials, &running, false)?;
                    self.files.load_or_empty(module, Datastore::Running)?
                }
            },
            other => self.files.load_or_empty(module, other)?,
        };

        let mut tree = stored.tree;
        if datastore == Datastore::Candidate {
            tree.retain_enabled_roots(|schema_path| {
                self.catalog.is_effectively_enabled(module, schema_path)
            });
        }
        tree.add_defaults(&schema);

        let read_only = match datastore {
            Datastore::Startup => false,
            Datastore::Running | Datastore::Candidate => !self.module_enabled_running(module),
        };

        Ok(DataInfo {
            module: module.to_string(),
            tree,
            modified: false,
            read_only,
            file_version: stored.meta.version,
            mtime: stored.meta.mtime,
        })
    }

    fn check_editable(info: &DataInfo, path: &XPath) -> Result<()> {
        if info.read_only {
            return Err(Error::with_xpath(
                ErrorKind::OperationFailed,
                format!("module '{}' is not enabled in running", info.module),
                path.to_string(),
            ));
        }
        Ok(())
    }

    /// Set the item addressed by `path`, logging the edit.
    pub fn set_item(
        &self,
        session: &mut Session,
        path_text: &str,
        value: Option<Value>,
        opts: EditOptions,
    ) -> Result<()> {
        let path = XPath::parse(path_text)?;
        let schema = self.catalog.get(&path.module)?;
        {
            let info = self.data_info(session, &path.module)?;
            Self::check_editable(info, &path)?;
            edit::apply_set(&schema, &mut info.tree, &path, value.clone(), opts)?;
            info.modified = true;
        }
        session.log_op(
            EditOperation::Set {
                path: path_text.to_string(),
                value,
            },
            opts,
        );
        Ok(())
    }

    /// Delete the items addressed by `path`, logging the edit.
    pub fn delete_item(
        &self,
        session: &mut Session,
        path_text: &str,
        opts: EditOptions,
    ) -> Result<()> {
        let path = XPath::parse(path_text)?;
        let schema = self.catalog.get(&path.module)?;
        {
            let info = self.data_info(session, &path.module)?;
            Self::check_editable(info, &path)?;
            edit::apply_delete(&schema, &mut info.tree, &path, opts)?;
            info.modified = true;
        }
        session.log_op(
            EditOperation::Delete {
                path: path_text.to_string(),
            },
            opts,
        );
        Ok(())
    }

    /// Move a user-ordered item, logging the edit.
    pub fn move_item(
        &self,
        session: &mut Session,
        path_text: &str,
        position: MovePosition,
        relative: Option<&str>,
    ) -> Result<()> {
        let path = XPath::parse(path_text)?;
        let relative_path = relative.map(XPath::parse).transpose()?;
        let schema = self.catalog.get(&path.module)?;
        {
            let info = self.data_info(session, &path.module)?;
            Self::check_editable(info, &path)?;
            edit::apply_move(&schema, &mut info.tree, &path, position, relative_path.as_ref())?;
            info.modified = true;
        }
        session.log_op(
            EditOperation::Move {
                path: path_text.to_string(),
                position,
                relative: relative.map(|r| r.to_string()),
            },
            EditOptions::default(),
        );
        Ok(())
    }

    /// Items matching `path` in the session's view of the data.
    pub fn get_items(&self, session: &mut Session, path: &XPath) -> Result<Vec<Item>> {
        let schema = self.catalog.get(&path.module)?;
        let config_only = session.options.config_only;
        let info = self.data_info(session, &path.module)?;
        Ok(info.tree.collect_items(&schema, path, config_only))
    }

    /// The single item addressed by `path`.
    pub fn get_item(&self, session: &mut Session, path: &XPath) -> Result<Item> {
        let mut items = self.get_items(session, path)?;
        match items.len() {
            0 => Err(Error::not_found(format!("item '{}' does not exist", path))),
            1 => Ok(items.remove(0)),
            _ => Err(Error::with_xpath(
                ErrorKind::InvalidArgument,
                "path addresses more than one item",
                path.to_string(),
            )),
        }
    }

    /// Run schema validation over every modified module of the session.
    pub fn validate(&self, session: &mut Session) -> std::result::Result<(), Vec<Error>> {
        let modules = session.modified_modules();
        let mut errors = Vec::new();
        for module in modules {
            let schema = match self.catalog.get(&module) {
                Ok(s) => s,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if let Some(info) = session.slot().data.get(&module) {
                errors.extend(validate_tree(&info.tree, &schema));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Drop the session's working copies and op-log for the current
    /// datastore.
    pub fn discard_changes(&self, session: &mut Session) {
        session.discard();
    }

    /// Copy configuration between datastores.
    ///
    /// A candidate source is validated first. A candidate destination
    /// replaces the session's working tree; any other destination writes
    /// the datastore file. A running destination requires the affected
    /// modules to be enabled.
    pub fn copy_config(
        &self,
        session: &mut Session,
        module: Option<&str>,
        src: Datastore,
        dst: Datastore,
    ) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let modules: Vec<String> = match module {
            Some(m) => vec![m.to_string()],
            None => self.catalog.loaded_modules(),
        };

        for module in &modules {
            let schema = self.catalog.get(module)?;

            // source tree: the session's working copy when it views the
            // source datastore, the stored file otherwise
            let source_tree = if session.datastore == src && session.slot().data.contains_key(module)
            {
                self.data_info(session, module)?.tree.clone()
            } else {
                let path = self.files.data_path(module, src);
                self.access.check(&session.credentials, &path, false)?;
                let mut tree = self.files.load_or_empty(module, src)?.tree;
                tree.add_defaults(&schema);
                tree
            };

            if src == Datastore::Candidate {
                let errors = validate_tree(&source_tree, &schema);
                if let Some(first) = errors.into_iter().next() {
                    return Err(first);
                }
            }

            if dst == Datastore::Running && !self.module_enabled_running(module) {
                return Err(Error::operation_failed(format!(
                    "module '{}' is not enabled in running",
                    module
                )));
            }

            if dst == Datastore::Candidate {
                let slot = session.slot_of_mut(Datastore::Candidate);
                slot.data.insert(
                    module.clone(),
                    DataInfo {
                        module: module.clone(),
                        tree: source_tree,
                        modified: true,
                        read_only: false,
                        file_version: 0,
                        mtime: None,
                    },
                );
            } else {
                let path = self.files.data_path(module, dst);
                self.access.check(&session.credentials, &path, true)?;
                let mut to_store = source_tree;
                to_store.strip_defaults();
                to_store.strip_state(&schema);
                let stamp = self.commit_stamp.fetch_add(1, Ordering::SeqCst) + 1;
                self.files.save(&to_store, dst, stamp)?;
            }
        }
        Ok(())
    }

    /// Reload stale working copies and replay the session's edits on
    /// them. Returns the modules that were already up to date.
    pub fn refresh(&self, session: &mut Session) -> Result<Vec<String>> {
        let datastore = session.datastore;
        let loaded: Vec<String> = session.slot().data.keys().cloned().collect();
        let mut up_to_date = Vec::new();

        for module in loaded {
            let schema = self.catalog.get(&module)?;
            let fresh = {
                let info = match session.slot().data.get(&module) {
                    Some(info) => info,
                    None => continue,
                };
                let meta = self.files.meta(&module, datastore)?;
                Self::copy_is_fresh(info, meta.as_ref())
            };
            if fresh {
                up_to_date.push(module.clone());
                continue;
            }

            // reload the base and replay this module's surviving ops
            let base = self.load_data_info(session, &module)?;
            let mut tree = base.tree.clone();
            let mut had_error = false;
            {
                let slot = session.slot_of_mut(datastore);
                for op in slot.ops.iter_mut() {
                    if op.operation.module() != Some(module.as_str()) || op.has_error {
                        continue;
                    }
                    if Self::replay_op(&schema, &mut tree, op).is_err() {
                        op.has_error = true;
                        had_error = true;
                    }
                }
            }
            if had_error {
                session.remove_operations_with_error();
            }
            let modified = session
                .slot()
                .ops
                .iter()
                .any(|op| op.operation.module() == Some(module.as_str()));
            session.slot_mut().data.insert(
                module.clone(),
                DataInfo {
                    tree,
                    modified,
                    ..base
                },
            );
        }

        observability::info(
            Event::SessionRefresh,
            &[("session", &session.id.to_string())],
        );
        Ok(up_to_date)
    }

    /// Whether a working copy still matches the stored file.
    ///
    /// The version counter is authoritative; files without a header fall
    /// back to an mtime comparison with a 10 ms guard band so that two
    /// writes in the same clock tick cannot alias.
    pub(crate) fn copy_is_fresh(info: &DataInfo, meta: Option<&crate::datastore::FileMeta>) -> bool {
        match meta {
            None => info.file_version == 0 && info.mtime.is_none(),
            Some(meta) => {
                if meta.version != 0 || info.file_version != 0 {
                    return meta.version == info.file_version;
                }
                match (info.mtime, meta.mtime) {
                    (Some(ours), Some(theirs)) => {
                        if ours != theirs {
                            return false;
                        }
                        // same tick is only trustworthy once the guard
                        // band has passed
                        SystemTime::now()
                            .duration_since(theirs)
                            .map(|age| age.as_millis() >= 10)
                            .unwrap_or(false)
                    }
                    (None, None) => true,
                    _ => false,
                }
            }
        }
    }

    pub(crate) fn replay_op(
        schema: &crate::yang::schema::SchemaModule,
        tree: &mut crate::yang::tree::DataTree,
        op: &EditOp,
    ) -> Result<()> {
        match &op.operation {
            EditOperation::Set { path, value } => {
                let parsed = XPath::parse(path)?;
                edit::apply_set(schema, tree, &parsed, value.clone(), op.options)
            }
            EditOperation::Delete { path } => {
                let parsed = XPath::parse(path)?;
                edit::apply_delete(schema, tree, &parsed, op.options).map(|_| ())
            }
            EditOperation::Move {
                path,
                position,
                relative,
            } => {
                let parsed = XPath::parse(path)?;
                let relative = relative.as_deref().map(XPath::parse).transpose()?;
                edit::apply_move(schema, tree, &parsed, *position, relative.as_ref())
            }
        }
    }

    /// Merge operational-data items supplied by a provider into the
    /// session's working tree. Providers fill state data, so neither the
    /// op-log nor the modified flag is touched and per-item failures are
    /// skipped.
    pub fn apply_provider_items(&self, session: &mut Session, items: &[Item]) {
        for item in items {
            let path = match XPath::parse(&item.path) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let schema = match self.catalog.get(&path.module) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if let Ok(info) = self.data_info(session, &path.module) {
                let _ = edit::apply_set(
                    &schema,
                    &mut info.tree,
                    &path,
                    Some(item.value.clone()),
                    EditOptions::default(),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // locking

    /// Lock one module in the session's datastore.
    pub fn lock_module(&self, session: &mut Session, module: &str) -> Result<()> {
        self.catalog.get(module)?;
        let datastore = session.datastore;
        let data_path = self.files.data_path(module, datastore);
        self.access.check(&session.credentials, &data_path, true)?;
        let lock_path = self.files.lock_path(module, datastore);
        let newly = self
            .locks
            .lock(&lock_path, session.id, LockMode::Exclusive, false)
            .map_err(|e| {
                if e.kind == ErrorKind::Locked {
                    observability::warn(
                        Event::LockDenied,
                        &[("module", module), ("session", &session.id.to_string())],
                    );
                }
                e
            })?;
        if newly {
            session.slot_mut().locked_files.push(lock_path);
            observability::info(
                Event::LockAcquired,
                &[("module", module), ("session", &session.id.to_string())],
            );
        }
        Ok(())
    }

    /// Unlock one module in the session's datastore.
    pub fn unlock_module(&self, session: &mut Session, module: &str) -> Result<()> {
        let lock_path = self.files.lock_path(module, session.datastore);
        self.locks.unlock(&lock_path, session.id)?;
        session.slot_mut().locked_files.retain(|p| p != &lock_path);
        observability::info(
            Event::LockReleased,
            &[("module", module), ("session", &session.id.to_string())],
        );
        Ok(())
    }

    /// Lock every module known to the session's datastore. Partial
    /// failure unwinds every previously acquired lock.
    pub fn lock_datastore(&self, session: &mut Session) -> Result<()> {
        let modules = self.catalog.loaded_modules();
        let mut acquired = Vec::new();
        for module in &modules {
            match self.lock_module(session, module) {
                Ok(()) => acquired.push(module.clone()),
                Err(e) => {
                    for locked in acquired.iter().rev() {
                        let _ = self.unlock_module(session, locked);
                    }
                    return Err(e);
                }
            }
        }
        session.slot_mut().holds_datastore_lock = true;
        Ok(())
    }

    /// Release the whole-datastore lock.
    pub fn unlock_datastore(&self, session: &mut Session) -> Result<()> {
        let locked: Vec<PathBuf> = session.slot().locked_files.clone();
        for path in locked {
            let _ = self.locks.unlock(&path, session.id);
        }
        let slot = session.slot_mut();
        slot.locked_files.clear();
        slot.holds_datastore_lock = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // enable-running management

    /// Enable a whole module in running, optionally seeding the running
    /// datastore from startup.
    pub fn enable_module_running(&self, module: &str, seed_from_startup: bool) -> Result<()> {
        let schema = self.catalog.get(module)?;
        for node in &schema.nodes {
            let path = schema.schema_path(&[node.name.as_str()]);
            self.catalog
                .set_node_state(module, &path, NodeState::EnabledWithChildren)?;
        }
        self.pm.set_module_enabled_running(module, true)?;
        if seed_from_startup {
            if let Some(stored) = self.files.load(module, Datastore::Startup)? {
                let stamp = self.commit_stamp.fetch_add(1, Ordering::SeqCst) + 1;
                self.files.save(&stored.tree, Datastore::Running, stamp)?;
            }
        }
        Ok(())
    }

    /// Enable a single subtree in running.
    pub fn enable_module_subtree_running(&self, module: &str, xpath: &str) -> Result<()> {
        let parsed = XPath::parse(xpath)?;
        let schema = self.catalog.get(module)?;
        edit::resolve_schema(&schema, &parsed)?;

        // ancestors become enabled, the subtree root covers its children
        let names = parsed.step_names();
        for depth in 1..names.len() {
            let path = schema.schema_path(&names[..depth]);
            if self.catalog.node_state(module, &path) == NodeState::Disabled {
                self.catalog.set_node_state(module, &path, NodeState::Enabled)?;
            }
        }
        let full = schema.schema_path(&names);
        self.catalog
            .set_node_state(module, &full, NodeState::EnabledWithChildren)?;
        self.pm.set_subtree_enabled(module, xpath, true)?;
        Ok(())
    }

    /// Disable a module in running.
    ///
    /// The walk inspects each child's own node kind when deciding
    /// whether to descend.
    pub fn disable_module_running(&self, module: &str) -> Result<()> {
        let schema = self.catalog.get(module)?;
        for node in &schema.nodes {
            let path = schema.schema_path(&[node.name.as_str()]);
            self.disable_walk(module, node, &path)?;
        }
        self.pm.set_module_enabled_running(module, false)?;
        Ok(())
    }

    fn disable_walk(
        &self,
        module: &str,
        node: &crate::yang::schema::SchemaNode,
        path: &str,
    ) -> Result<()> {
        self.catalog.set_node_state(module, path, NodeState::Disabled)?;
        for child in &node.children {
            if child.kind.is_interior() || child.kind.is_leaf() {
                let child_path = format!("{}/{}", path, child.name);
                self.disable_walk(module, child, &child_path)?;
            }
        }
        Ok(())
    }

    /// Whether a module (or one subtree of it) is enabled in running.
    pub fn check_enabled_running(&self, module: &str, xpath: Option<&str>) -> Result<bool> {
        self.catalog.get(module)?;
        match xpath {
            None => Ok(self.catalog.has_enabled_subtree(module)),
            Some(xpath) => {
                let parsed = XPath::parse(xpath)?;
                let schema = self.catalog.get(module)?;
                edit::resolve_schema(&schema, &parsed)?;
                let schema_path = schema.schema_path(&parsed.step_names());
                Ok(self.catalog.is_effectively_enabled(module, &schema_path))
            }
        }
    }

    // ------------------------------------------------------------------
    // commit context plumbing

    /// Acknowledge an apply notification; releases the context when the
    /// last ack arrives.
    pub fn ack_commit(&self, commit_id: u32, subscription_id: u32) -> Result<()> {
        let ctx = self
            .commit_store
            .get(commit_id)
            .ok_or_else(|| Error::not_found(format!("commit {} is not available", commit_id)))?;
        if ctx.ack(subscription_id) {
            self.commit_store.release(commit_id);
        }
        Ok(())
    }

    /// Force-release a commit context (release timeout).
    pub fn release_commit(&self, commit_id: u32) {
        self.commit_store.release(commit_id);
    }
}
