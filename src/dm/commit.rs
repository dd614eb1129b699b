//! Commit pipeline
//!
//! Module-by-module, a commit: prepares a context under a fresh commit
//! id, locks the target datastore of every modified module, reloads the
//! on-disk bases and replays the op-log where the working copy is stale,
//! validates everything together, lets verifiers veto, writes the files
//! (truncate, serialize, fsync), computes per-module diffs, publishes
//! the context and finally fans out apply notifications without
//! blocking on acknowledgements. Validation failures abort before any
//! file is written.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::Datastore;
use crate::locks::LockMode;
use crate::np::{
    subscription_matches, ChangeEvent, CommitNotification, NotificationProcessor,
    SubscriptionHandler,
};
use crate::observability::{self, Event};
use crate::yang::diff::diff_trees;
use crate::yang::schema::SchemaModule;
use crate::yang::tree::DataTree;
use crate::yang::validate::validate_tree;

use super::commit_context::{CommitContext, ModuleDelta};
use super::session::Session;
use super::DataManager;

const COMMIT_ID_MAX_ATTEMPTS: usize = 100;

impl DataManager {
    /// Commit the session's changes. Returns the commit id, or `None`
    /// for a no-op commit.
    pub fn commit(
        &self,
        session: &mut Session,
        np: &NotificationProcessor,
    ) -> std::result::Result<Option<u32>, Vec<Error>> {
        let datastore = session.datastore;
        let target = datastore.commit_target();
        let modified = session.modified_modules();

        // zero logged ops on a non-candidate datastore is a no-op
        if modified.is_empty()
            || (session.slot().ops.is_empty() && datastore != Datastore::Candidate)
        {
            return Ok(None);
        }

        let id = self.assign_commit_id().map_err(|e| vec![e])?;
        observability::info(
            Event::CommitStart,
            &[
                ("commit_id", &id.to_string()),
                ("session", &session.id.to_string()),
                ("datastore", target.suffix()),
            ],
        );

        let mut ctx = CommitContext::new(id, target, session.credentials.clone());
        if target != Datastore::Startup {
            for module in &modified {
                ctx.subscriptions
                    .insert(module.clone(), np.change_subscriptions(module));
            }
        }

        // lock the target datastore of every modified module; candidate
        // commits additionally lock the candidate view
        let mut acquired: Vec<PathBuf> = Vec::new();
        for module in &modified {
            let mut paths = vec![self.files.lock_path(module, target)];
            if datastore == Datastore::Candidate {
                paths.push(self.files.lock_path(module, Datastore::Candidate));
            }
            for lock_path in paths {
                match self
                    .locks
                    .lock(&lock_path, session.id, LockMode::Exclusive, false)
                {
                    Ok(true) => acquired.push(lock_path),
                    Ok(false) => {}
                    Err(e) => {
                        self.release_locks(&acquired, session.id);
                        return Err(vec![e]);
                    }
                }
            }
        }

        // candidate commits require every subtree to be enabled
        if datastore == Datastore::Candidate {
            for module in &modified {
                if let Some(info) = session.slot().data.get(module) {
                    for root in &info.tree.roots {
                        let schema_path = format!("/{}:{}", module, root.name);
                        if !self.catalog.is_effectively_enabled(module, &schema_path) {
                            self.release_locks(&acquired, session.id);
                            return Err(vec![Error::with_xpath(
                                ErrorKind::OperationFailed,
                                format!(
                                    "subtree of module '{}' is not enabled in running",
                                    module
                                ),
                                schema_path,
                            )]);
                        }
                    }
                }
            }
        }

        // open and read bases, replaying the op-log onto stale copies
        let mut schemas: HashMap<String, Arc<SchemaModule>> = HashMap::new();
        let mut pre_trees: HashMap<String, DataTree> = HashMap::new();
        let mut merged: HashMap<String, DataTree> = HashMap::new();
        let mut replay_errors: Vec<Error> = Vec::new();

        for module in &modified {
            let schema = match self.catalog.get(module) {
                Ok(s) => s,
                Err(e) => {
                    self.release_locks(&acquired, session.id);
                    return Err(vec![e]);
                }
            };
            let data_path = self.files.data_path(module, target);
            if let Err(e) = self.access.check(&session.credentials, &data_path, true) {
                self.release_locks(&acquired, session.id);
                return Err(vec![e]);
            }

            let disk = match self.files.load_or_empty(module, target) {
                Ok(stored) => stored,
                Err(e) => {
                    self.release_locks(&acquired, session.id);
                    return Err(vec![e]);
                }
            };
            let mut disk_tree = disk.tree;
            disk_tree.add_defaults(&schema);

            let info = match session.slot().data.get(module) {
                Some(info) => info,
                None => {
                    self.release_locks(&acquired, session.id);
                    return Err(vec![Error::internal("modified module has no working copy")]);
                }
            };

            // candidate commits take the working copy as-is; otherwise
            // a fresh copy is reused and a stale one is rebuilt from the
            // disk base plus the op-log
            let fresh = datastore == Datastore::Candidate || Self::copy_is_fresh(info, Some(&disk.meta));
            let reused = if fresh { Some(info.tree.clone()) } else { None };
            let merged_tree = match reused {
                Some(tree) => tree,
                None => {
                    let mut tree = disk_tree.clone();
                    let slot = session.slot_of_mut(datastore);
                    for op in slot.ops.iter_mut() {
                        if op.operation.module() != Some(module.as_str()) || op.has_error {
                            continue;
                        }
                        if let Err(e) = Self::replay_op(&schema, &mut tree, op) {
                            op.has_error = true;
                            replay_errors.push(e);
                        }
                    }
                    tree
                }
            };

            if target != Datastore::Startup {
                pre_trees.insert(module.clone(), disk_tree);
            }
            merged.insert(module.clone(), merged_tree);
            schemas.insert(module.clone(), schema);
        }

        if !replay_errors.is_empty() {
            session.remove_operations_with_error();
            self.release_locks(&acquired, session.id);
            return Err(replay_errors);
        }

        // validate all merged trees together; abort before any write
        let mut validation_errors = Vec::new();
        for module in &modified {
            let schema = &schemas[module];
            if let Some(tree) = merged.get_mut(module) {
                tree.add_defaults(schema);
                validation_errors.extend(validate_tree(tree, schema));
            }
        }
        if !validation_errors.is_empty() {
            observability::warn(
                Event::CommitValidationFailed,
                &[("commit_id", &id.to_string())],
            );
            self.release_locks(&acquired, session.id);
            return Err(validation_errors);
        }

        // per-module diffs, needed both by verifiers and by observers
        if target != Datastore::Startup {
            for module in &modified {
                let schema = &schemas[module];
                let empty = DataTree::empty(module.clone());
                let pre = pre_trees.get(module).unwrap_or(&empty);
                let post = &merged[module];
                let diff = diff_trees(schema, pre, post);
                ctx.deltas
                    .insert(module.clone(), ModuleDelta::new(module.clone(), diff));
            }
            ctx.pre_trees = pre_trees;
            ctx.post_trees = merged.clone();
        }

        // verify phase: strict descending priority, any veto aborts
        if target != Datastore::Startup {
            for module in &modified {
                if let Err(veto) = self.notify_verifiers(&ctx, module, &schemas[module]) {
                    observability::warn(
                        Event::CommitVetoed,
                        &[("commit_id", &id.to_string()), ("module", module)],
                    );
                    self.release_locks(&acquired, session.id);
                    return Err(vec![veto]);
                }
            }
        }

        // write files; a failure is reported but later writes are still
        // attempted so the disk state stays consistent per module
        let mut write_errors = Vec::new();
        for module in &modified {
            let mut to_store = merged[module].clone();
            to_store.strip_defaults();
            // state data gathered from providers never reaches the disk
            to_store.strip_state(&schemas[module]);
            let stamp = self.commit_stamp.fetch_add(1, Ordering::SeqCst) + 1;
            match self.files.save(&to_store, target, stamp) {
                Ok(meta) => {
                    if datastore == target {
                        if let Some(info) = session.slot_mut().data.get_mut(module) {
                            info.file_version = meta.version;
                            info.mtime = meta.mtime;
                        }
                    }
                }
                Err(e) => {
                    write_errors.push(Error::new(
                        ErrorKind::OperationFailed,
                        format!("write of module '{}' failed: {}", module, e.message),
                    ));
                }
            }
        }
        {
            let mut last = self.last_commit.lock().unwrap_or_else(|p| p.into_inner());
            *last = Some(SystemTime::now());
        }
        observability::info(Event::CommitWritten, &[("commit_id", &id.to_string())]);

        if !write_errors.is_empty() {
            self.release_locks(&acquired, session.id);
            return Err(write_errors);
        }

        // publish the context, release module locks
        let ctx = Arc::new(ctx);
        if target != Datastore::Startup {
            self.commit_store.insert(Arc::clone(&ctx));
        }
        self.release_locks(&acquired, session.id);
        session.mark_committed();

        // apply phase: same order, never blocks the committer
        if target != Datastore::Startup {
            self.notify_observers(&ctx, &schemas);
            if ctx.pending_count() == 0 {
                self.commit_store.release(id);
            }
        }

        observability::info(Event::CommitComplete, &[("commit_id", &id.to_string())]);
        Ok(Some(id))
    }

    fn assign_commit_id(&self) -> crate::core::error::Result<u32> {
        for _ in 0..COMMIT_ID_MAX_ATTEMPTS {
            let id: u32 = rand::random();
            if id != 0 && !self.commit_store.contains(id) {
                return Ok(id);
            }
        }
        Err(Error::internal("unable to generate a unique commit id"))
    }

    fn release_locks(&self, acquired: &[PathBuf], holder: u32) {
        for path in acquired.iter().rev() {
            let _ = self.locks.unlock(path, holder);
        }
    }

    fn notify_verifiers(
        &self,
        ctx: &CommitContext,
        module: &str,
        schema: &SchemaModule,
    ) -> crate::core::error::Result<()> {
        let delta = match ctx.deltas.get(module) {
            Some(d) => d,
            None => return Ok(()),
        };
        let empty = DataTree::empty(module);
        let pre = ctx.pre_trees.get(module).unwrap_or(&empty);
        let post = ctx.post_trees.get(module).unwrap_or(&empty);
        let subs = match ctx.subscriptions.get(module) {
            Some(s) => s,
            None => return Ok(()),
        };
        for sub in subs {
            if !sub.events.verify || sub.options.passive {
                continue;
            }
            let hit = delta
                .diff
                .iter()
                .any(|entry| subscription_matches(sub, entry, schema, pre, post));
            if !hit {
                continue;
            }
            if let SubscriptionHandler::Change(handler) = &sub.handler {
                handler(&CommitNotification {
                    commit_id: ctx.id,
                    module: module.to_string(),
                    datastore: ctx.datastore,
                    event: ChangeEvent::Verify,
                    subscription_id: sub.id,
                })?;
            }
        }
        Ok(())
    }

    fn notify_observers(&self, ctx: &CommitContext, schemas: &HashMap<String, Arc<SchemaModule>>) {
        for module in ctx.modules() {
            let schema = match schemas.get(module) {
                Some(s) => s,
                None => continue,
            };
            let delta = match ctx.deltas.get(module) {
                Some(d) => d,
                None => continue,
            };
            let empty = DataTree::empty(module);
            let pre = ctx.pre_trees.get(module).unwrap_or(&empty);
            let post = ctx.post_trees.get(module).unwrap_or(&empty);
            let subs = match ctx.subscriptions.get(module) {
                Some(s) => s,
                None => continue,
            };
            // register outstanding acks before any delivery so an early
            // acknowledgement cannot release the context prematurely
            let manual: Vec<u32> = subs
                .iter()
                .filter(|s| {
                    s.events.apply
                        && s.options.manual_ack
                        && delta
                            .diff
                            .iter()
                            .any(|e| subscription_matches(s, e, schema, pre, post))
                })
                .map(|s| s.id)
                .collect();
            ctx.add_pending_acks(manual);

            for sub in subs {
                if !sub.events.apply {
                    continue;
                }
                let hit = delta
                    .diff
                    .iter()
                    .any(|entry| subscription_matches(sub, entry, schema, pre, post));
                if !hit {
                    continue;
                }
                if let SubscriptionHandler::Change(handler) = &sub.handler {
                    let result = handler(&CommitNotification {
                        commit_id: ctx.id,
                        module: module.to_string(),
                        datastore: ctx.datastore,
                        event: ChangeEvent::Apply,
                        subscription_id: sub.id,
                    });
                    if let Err(e) = result {
                        // apply is post-commit: delivery failures are
                        // logged and never roll back the datastore
                        observability::warn(
                            Event::ApplyNotified,
                            &[
                                ("commit_id", &ctx.id.to_string()),
                                ("module", module),
                                ("error", &e.message),
                            ],
                        );
                        continue;
                    }
                    observability::info(
                        Event::ApplyNotified,
                        &[
                            ("commit_id", &ctx.id.to_string()),
                            ("module", module),
                            ("destination", &sub.destination),
                        ],
                    );
                }
            }
        }
    }
}
