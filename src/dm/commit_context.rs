//! Commit contexts
//!
//! A commit snapshots its pre/post trees, per-module diffs and the
//! subscription views taken at prepare time. Contexts are published into
//! a store keyed by commit id; notification sessions consult them until
//! the last subscriber acknowledges or the release timeout fires.
//! Change records are materialized from the diff on first access and
//! cached under a per-context read/write lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::error::{Error, Result};
use crate::core::types::{Credentials, Datastore};
use crate::core::value::Item;
use crate::np::Subscription;
use crate::observability::{self, Event};
use crate::yang::diff::{DiffEntry, DiffOp};
use crate::yang::path::XPath;
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};
use crate::yang::tree::{DataNode, DataTree};

/// Operation of a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Created,
    Deleted,
    Modified,
    Moved,
}

/// One change exposed to notification sessions.
///
/// For `Moved`, `new` carries the moved item and `old` its new
/// predecessor; a missing predecessor means moved to head.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChangeRecord {
    pub operation: ChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Item>,
}

impl ChangeRecord {
    /// Instance identifier the record is about.
    pub fn path(&self) -> &str {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|i| i.path.as_str())
            .unwrap_or("")
    }
}

/// Per-module diff of one commit, with the lazily materialized records.
pub struct ModuleDelta {
    pub module: String,
    pub diff: Vec<DiffEntry>,
    changes: RwLock<Option<Arc<Vec<ChangeRecord>>>>,
}

impl ModuleDelta {
    pub fn new(module: impl Into<String>, diff: Vec<DiffEntry>) -> Self {
        Self {
            module: module.into(),
            diff,
            changes: RwLock::new(None),
        }
    }
}

/// Snapshot of one commit.
pub struct CommitContext {
    pub id: u32,
    /// Datastore the commit targeted
    pub datastore: Datastore,
    /// Identity of the committing session
    pub credentials: Credentials,
    /// Pre-commit trees by module
    pub pre_trees: HashMap<String, DataTree>,
    /// Post-commit trees by module
    pub post_trees: HashMap<String, DataTree>,
    /// Diffs by module
    pub deltas: HashMap<String, ModuleDelta>,
    /// Change subscriptions per module, descending priority
    pub subscriptions: HashMap<String, Vec<Subscription>>,
    pending_acks: Mutex<HashSet<u32>>,
}

impl CommitContext {
    pub fn new(id: u32, datastore: Datastore, credentials: Credentials) -> Self {
        Self {
            id,
            datastore,
            credentials,
            pre_trees: HashMap::new(),
            post_trees: HashMap::new(),
            deltas: HashMap::new(),
            subscriptions: HashMap::new(),
            pending_acks: Mutex::new(HashSet::new()),
        }
    }

    /// Modules this commit touched.
    pub fn modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.deltas.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Materialized change records of one module, cached on first use.
    pub fn changes(&self, module: &str, schema: &SchemaModule) -> Result<Arc<Vec<ChangeRecord>>> {
        let delta = self
            .deltas
            .get(module)
            .ok_or_else(|| Error::not_found(format!("commit {} did not touch '{}'", self.id, module)))?;

        {
            let cached = delta.changes.read().unwrap_or_else(|p| p.into_inner());
            if let Some(records) = cached.as_ref() {
                return Ok(Arc::clone(records));
            }
        }

        let mut guard = delta.changes.write().unwrap_or_else(|p| p.into_inner());
        if let Some(records) = guard.as_ref() {
            return Ok(Arc::clone(records));
        }
        let pre = self.pre_trees.get(module);
        let post = self.post_trees.get(module);
        let records = Arc::new(translate_diff(&delta.diff, pre, post, schema));
        *guard = Some(Arc::clone(&records));
        Ok(records)
    }

    /// Register subscriptions that must acknowledge the apply phase.
    pub fn add_pending_acks(&self, subscription_ids: impl IntoIterator<Item = u32>) {
        let mut pending = self.pending_acks.lock().unwrap_or_else(|p| p.into_inner());
        pending.extend(subscription_ids);
    }

    /// Acknowledge one subscription. Returns true when none remain.
    pub fn ack(&self, subscription_id: u32) -> bool {
        let mut pending = self.pending_acks.lock().unwrap_or_else(|p| p.into_inner());
        pending.remove(&subscription_id);
        pending.is_empty()
    }

    /// Number of outstanding acknowledgements.
    pub fn pending_count(&self) -> usize {
        self.pending_acks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

/// Store of live commit contexts, keyed by commit id.
pub struct CommitContextStore {
    contexts: RwLock<BTreeMap<u32, Arc<CommitContext>>>,
}

impl CommitContextStore {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.contexts
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&id)
    }

    pub fn insert(&self, context: Arc<CommitContext>) {
        self.contexts
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(context.id, context);
    }

    pub fn get(&self, id: u32) -> Option<Arc<CommitContext>> {
        self.contexts
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    /// Remove a released context.
    pub fn release(&self, id: u32) -> Option<Arc<CommitContext>> {
        let removed = self
            .contexts
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
        if removed.is_some() {
            observability::info(Event::CommitReleased, &[("commit_id", &id.to_string())]);
        }
        removed
    }

    pub fn ids(&self) -> Vec<u32> {
        self.contexts
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

impl Default for CommitContextStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a diff into leaf-granular change records.
///
/// Creation or deletion of a container/list expands into a depth-first
/// walk emitting a record per descendant leaf, leaf-list entry and
/// presence container, never for plain containers and lists themselves.
fn translate_diff(
    diff: &[DiffEntry],
    pre: Option<&DataTree>,
    post: Option<&DataTree>,
    schema: &SchemaModule,
) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    for entry in diff {
        match entry.op {
            DiffOp::Created => {
                let is_interior = entry
                    .new
                    .as_ref()
                    .map(|i| i.value.is_interior())
                    .unwrap_or(false);
                if is_interior {
                    if let Some(post) = post {
                        for item in expand_subtree(post, schema, &entry.path) {
                            records.push(ChangeRecord {
                                operation: ChangeOp::Created,
                                old: None,
                                new: Some(item),
                            });
                        }
                    }
                } else {
                    records.push(ChangeRecord {
                        operation: ChangeOp::Created,
                        old: None,
                        new: entry.new.clone(),
                    });
                }
            }
            DiffOp::Deleted => {
                let is_interior = entry
                    .old
                    .as_ref()
                    .map(|i| i.value.is_interior())
                    .unwrap_or(false);
                if is_interior {
                    if let Some(pre) = pre {
                        for item in expand_subtree(pre, schema, &entry.path) {
                            records.push(ChangeRecord {
                                operation: ChangeOp::Deleted,
                                old: Some(item),
                                new: None,
                            });
                        }
                    }
                } else {
                    records.push(ChangeRecord {
                        operation: ChangeOp::Deleted,
                        old: entry.old.clone(),
                        new: None,
                    });
                }
            }
            DiffOp::Changed => {
                records.push(ChangeRecord {
                    operation: ChangeOp::Modified,
                    old: entry.old.clone(),
                    new: entry.new.clone(),
                });
            }
            DiffOp::MovedAfter1 | DiffOp::MovedAfter2 => {
                let predecessor = entry.predecessor.as_ref().and_then(|path| {
                    lookup_item(post, schema, path)
                });
                records.push(ChangeRecord {
                    operation: ChangeOp::Moved,
                    old: predecessor,
                    new: entry.new.clone(),
                });
            }
        }
    }
    records
}

fn lookup_item(tree: Option<&DataTree>, schema: &SchemaModule, path: &str) -> Option<Item> {
    let tree = tree?;
    let parsed = XPath::parse(path).ok()?;
    let mut selected = tree.select(schema, &parsed);
    if selected.len() != 1 {
        return None;
    }
    let sel = selected.remove(0);
    Some(sel.node.to_item(sel.path))
}

/// Value-bearing items of a subtree, root included, depth-first.
fn expand_subtree(tree: &DataTree, schema: &SchemaModule, path: &str) -> Vec<Item> {
    fn walk(node: &DataNode, node_path: &str, sn: Option<&SchemaNode>, out: &mut Vec<Item>) {
        match node.kind {
            NodeKind::Leaf | NodeKind::LeafList | NodeKind::PresenceContainer => {
                out.push(node.to_item(node_path.to_string()));
            }
            _ => {}
        }
        for child in &node.children {
            let child_sn = sn.and_then(|s| s.child(&child.name));
            let child_path = child.instance_fragment(node_path, child_sn);
            walk(child, &child_path, child_sn, out);
        }
    }

    let mut out = Vec::new();
    let parsed = match XPath::parse(path) {
        Ok(p) => p,
        Err(_) => return out,
    };
    for sel in tree.select(schema, &parsed) {
        walk(sel.node, &sel.path, sel.schema, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::yang::diff::diff_trees;

    fn schema() -> SchemaModule {
        serde_json::from_value(serde_json::json!({
            "name": "ex",
            "prefix": "ex",
            "nodes": [{
                "name": "c",
                "kind": "container",
                "children": [{
                    "name": "list",
                    "kind": "list",
                    "keys": ["key"],
                    "children": [
                        { "name": "key", "kind": "leaf", "type": { "base": "string" } },
                        { "name": "leaf", "kind": "leaf", "type": { "base": "string" } }
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    fn tree_with_instance() -> DataTree {
        let mut list = DataNode::interior("list", NodeKind::List);
        list.children.push(DataNode::leaf("key", Value::String("x".into())));
        list.children.push(DataNode::leaf("leaf", Value::String("v".into())));
        let mut c = DataNode::interior("c", NodeKind::Container);
        c.children.push(list);
        let mut tree = DataTree::empty("ex");
        tree.roots.push(c);
        tree
    }

    fn context_for(pre: DataTree, post: DataTree) -> CommitContext {
        let diff = diff_trees(&schema(), &pre, &post);
        let mut ctx = CommitContext::new(42, Datastore::Running, Credentials::process());
        ctx.deltas.insert("ex".into(), ModuleDelta::new("ex", diff));
        ctx.pre_trees.insert("ex".into(), pre);
        ctx.post_trees.insert("ex".into(), post);
        ctx
    }

    #[test]
    fn test_interior_creation_expands_to_leaves() {
        let ctx = context_for(DataTree::empty("ex"), tree_with_instance());
        let changes = ctx.changes("ex", &schema()).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.operation == ChangeOp::Created));
        let paths: Vec<&str> = changes.iter().map(|c| c.path()).collect();
        assert_eq!(
            paths,
            vec!["/ex:c/list[key='x']/key", "/ex:c/list[key='x']/leaf"]
        );
    }

    #[test]
    fn test_interior_deletion_expands_from_pre_tree() {
        let ctx = context_for(tree_with_instance(), DataTree::empty("ex"));
        let changes = ctx.changes("ex", &schema()).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.operation == ChangeOp::Deleted));
        assert!(changes.iter().all(|c| c.new.is_none() && c.old.is_some()));
    }

    #[test]
    fn test_changes_are_cached() {
        let ctx = context_for(DataTree::empty("ex"), tree_with_instance());
        let first = ctx.changes("ex", &schema()).unwrap();
        let second = ctx.changes("ex", &schema()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_module_rejected() {
        let ctx = context_for(DataTree::empty("ex"), tree_with_instance());
        assert!(ctx.changes("other", &schema()).is_err());
    }

    #[test]
    fn test_ack_accounting() {
        let ctx = CommitContext::new(1, Datastore::Running, Credentials::process());
        ctx.add_pending_acks([10, 20]);
        assert_eq!(ctx.pending_count(), 2);
        assert!(!ctx.ack(10));
        assert!(ctx.ack(20));
        // idempotent
        assert!(ctx.ack(20));
    }

    #[test]
    fn test_store_insert_get_release() {
        let store = CommitContextStore::new();
        let ctx = Arc::new(CommitContext::new(7, Datastore::Running, Credentials::process()));
        store.insert(Arc::clone(&ctx));
        assert!(store.contains(7));
        assert!(store.get(7).is_some());
        assert!(store.release(7).is_some());
        assert!(store.get(7).is_none());
        assert!(store.release(7).is_none());
    }
}
