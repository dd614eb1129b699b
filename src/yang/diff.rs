//! Ordered tree diff
//!
//! Computes the difference between two trees of the same module as an
//! ordered entry stream. Interior creations and deletions appear as a
//! single entry for the subtree root; expansion to leaf granularity is
//! the consumer's concern. Order is stable: within one sibling group,
//! deletions (old order), then creations (new order), then value changes
//! and recursion (new order), then moves of user-ordered entries.

use crate::core::value::Item;
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};
use crate::yang::tree::{DataNode, DataTree};

/// Kind of a diff entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    /// Node exists only in the new tree
    Created,
    /// Node exists only in the old tree
    Deleted,
    /// Leaf value changed
    Changed,
    /// Existing user-ordered entry changed position
    MovedAfter1,
    /// Newly created user-ordered entry placed at a non-tail position
    MovedAfter2,
}

/// One entry of the diff stream.
#[derive(Debug, Clone)]
pub struct DiffEntry {
    pub op: DiffOp,
    /// Instance identifier of the affected node
    pub path: String,
    /// Old value, for deletions and changes
    pub old: Option<Item>,
    /// New value, for creations and changes
    pub new: Option<Item>,
    /// Instance identifier of the new predecessor; `None` means head
    pub predecessor: Option<String>,
}

/// Compute the ordered diff between two trees.
pub fn diff_trees(schema: &SchemaModule, old: &DataTree, new: &DataTree) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    diff_siblings_inner(schema, None, &old.roots, &new.roots, None, &old.module, &mut entries);
    entries
}

/// Identity of a node within its sibling group.
fn identity(node: &DataNode, sn: Option<&SchemaNode>) -> String {
    match node.kind {
        NodeKind::List => {
            let keys: Vec<String> = sn
                .map(|s| {
                    s.keys
                        .iter()
                        .map(|k| {
                            node.child_leaf_value(k)
                                .map(|v| v.canonical())
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .unwrap_or_default();
            format!("{}\u{1f}{}", node.name, keys.join("\u{1f}"))
        }
        NodeKind::LeafList => format!(
            "{}\u{1f}{}",
            node.name,
            node.value.as_ref().map(|v| v.canonical()).unwrap_or_default()
        ),
        _ => node.name.clone(),
    }
}

fn node_path(node: &DataNode, parent: Option<&str>, module: &str, sn: Option<&SchemaNode>) -> String {
    match parent {
        Some(p) => node.instance_fragment(p, sn),
        None => node.root_instance(module, sn),
    }
}

fn schema_child<'a>(
    schema: &'a SchemaModule,
    parent_schema: Option<&'a SchemaNode>,
    name: &str,
    top_level: bool,
) -> Option<&'a SchemaNode> {
    if top_level {
        schema.top_node(name)
    } else {
        parent_schema.and_then(|s| s.child(name))
    }
}

fn diff_siblings_inner(
    schema: &SchemaModule,
    parent_schema: Option<&SchemaNode>,
    old_children: &[DataNode],
    new_children: &[DataNode],
    parent_path: Option<&str>,
    module: &str,
    entries: &mut Vec<DiffEntry>,
) {
    let top_level = parent_path.is_none();

    let old_ids: Vec<String> = old_children
        .iter()
        .map(|n| identity(n, schema_child(schema, parent_schema, &n.name, top_level)))
        .collect();
    let new_ids: Vec<String> = new_children
        .iter()
        .map(|n| identity(n, schema_child(schema, parent_schema, &n.name, top_level)))
        .collect();

    // deletions, in old order
    for (i, node) in old_children.iter().enumerate() {
        if !new_ids.contains(&old_ids[i]) {
            let sn = schema_child(schema, parent_schema, &node.name, top_level);
            let path = node_path(node, parent_path, module, sn);
            entries.push(DiffEntry {
                op: DiffOp::Deleted,
                path: path.clone(),
                old: Some(node.to_item(path)),
                new: None,
                predecessor: None,
            });
        }
    }

    // creations, in new order
    for (i, node) in new_children.iter().enumerate() {
        if !old_ids.contains(&new_ids[i]) {
            let sn = schema_child(schema, parent_schema, &node.name, top_level);
            let path = node_path(node, parent_path, module, sn);
            entries.push(DiffEntry {
                op: DiffOp::Created,
                path: path.clone(),
                old: None,
                new: Some(node.to_item(path)),
                predecessor: None,
            });
        }
    }

    // changes and recursion, in new order
    for (i, node) in new_children.iter().enumerate() {
        if let Some(old_idx) = old_ids.iter().position(|id| *id == new_ids[i]) {
            let old_node = &old_children[old_idx];
            let sn = schema_child(schema, parent_schema, &node.name, top_level);
            let path = node_path(node, parent_path, module, sn);
            match node.kind {
                NodeKind::Leaf => {
                    if old_node.value != node.value {
                        entries.push(DiffEntry {
                            op: DiffOp::Changed,
                            path: path.clone(),
                            old: Some(old_node.to_item(path.clone())),
                            new: Some(node.to_item(path)),
                            predecessor: None,
                        });
                    }
                }
                NodeKind::LeafList => {
                    // identity includes the value: matched entries are equal
                }
                _ => {
                    diff_siblings_inner(
                        schema,
                        sn,
                        &old_node.children,
                        &node.children,
                        Some(&path),
                        module,
                        entries,
                    );
                }
            }
        }
    }

    // moves within user-ordered sibling groups
    let mut group_names: Vec<&str> = Vec::new();
    for node in new_children {
        if !group_names.contains(&node.name.as_str()) {
            group_names.push(&node.name);
        }
    }
    for name in group_names {
        let sn = match schema_child(schema, parent_schema, name, top_level) {
            Some(sn) if sn.user_ordered => sn,
            _ => continue,
        };
        diff_moves(
            schema,
            sn,
            old_children,
            new_children,
            &old_ids,
            &new_ids,
            name,
            parent_path,
            module,
            entries,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn diff_moves(
    _schema: &SchemaModule,
    sn: &SchemaNode,
    old_children: &[DataNode],
    new_children: &[DataNode],
    old_ids: &[String],
    new_ids: &[String],
    name: &str,
    parent_path: Option<&str>,
    module: &str,
    entries: &mut Vec<DiffEntry>,
) {
    // new-order positions of this group
    let group: Vec<usize> = new_children
        .iter()
        .enumerate()
        .filter(|(_, n)| n.name == name)
        .map(|(i, _)| i)
        .collect();
    if group.len() < 2 {
        return;
    }

    // old index of every common entry, in new order; usize::MAX marks created
    let old_pos: Vec<usize> = group
        .iter()
        .map(|&i| {
            old_ids
                .iter()
                .position(|id| *id == new_ids[i])
                .unwrap_or(usize::MAX)
        })
        .collect();

    // longest increasing subsequence over the common entries: those stay put
    let stable = longest_increasing(&old_pos);

    for (gi, &i) in group.iter().enumerate() {
        let node = &new_children[i];
        let path = node_path(node, parent_path, module, Some(sn));
        let predecessor = if gi == 0 {
            None
        } else {
            let prev = &new_children[group[gi - 1]];
            Some(node_path(prev, parent_path, module, Some(sn)))
        };
        if old_pos[gi] == usize::MAX {
            // created entry not at the tail of its group
            if gi + 1 < group.len() {
                entries.push(DiffEntry {
                    op: DiffOp::MovedAfter2,
                    path: path.clone(),
                    old: None,
                    new: Some(node.to_item(path)),
                    predecessor,
                });
            }
        } else if !stable.contains(&gi) {
            let old_node = &old_children[old_pos[gi]];
            entries.push(DiffEntry {
                op: DiffOp::MovedAfter1,
                path: path.clone(),
                old: Some(old_node.to_item(path.clone())),
                new: Some(node.to_item(path)),
                predecessor,
            });
        }
    }
}

/// Indexes (into the input) forming a longest increasing subsequence,
/// ignoring `usize::MAX` sentinels.
fn longest_increasing(values: &[usize]) -> Vec<usize> {
    let n = values.len();
    let mut best_len = vec![0usize; n];
    let mut prev = vec![usize::MAX; n];
    let mut best_end = usize::MAX;
    let mut best = 0;
    for i in 0..n {
        if values[i] == usize::MAX {
            continue;
        }
        best_len[i] = 1;
        for j in 0..i {
            if values[j] == usize::MAX {
                continue;
            }
            if values[j] < values[i] && best_len[j] + 1 > best_len[i] {
                best_len[i] = best_len[j] + 1;
                prev[i] = j;
            }
        }
        if best_len[i] > best {
            best = best_len[i];
            best_end = i;
        }
    }
    let mut out = Vec::new();
    let mut cur = best_end;
    while cur != usize::MAX {
        out.push(cur);
        cur = prev[cur];
    }
    out.reverse();
    out
}
