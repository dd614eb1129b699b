//! Schema validation of data trees
//!
//! Validation collects every violation instead of stopping at the first;
//! each error carries the instance identifier it was detected at.

use std::collections::HashSet;

use crate::core::error::Error;
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};
use crate::yang::tree::{DataNode, DataTree};

/// Validate a tree against its module schema.
///
/// Returns every violation found. An empty vector means the tree is valid.
pub fn validate_tree(tree: &DataTree, schema: &SchemaModule) -> Vec<Error> {
    let mut errors = Vec::new();
    check_siblings(
        &tree.roots,
        &schema.nodes,
        &format!("/{}:", tree.module),
        true,
        &mut errors,
    );
    errors
}

/// Validate the subtree rooted at an operation node (rpc/action/notification).
///
/// Used by procedure validation, where the tree is temporary and rooted
/// at the operation itself.
pub fn validate_subtree(node: &DataNode, schema_node: &SchemaNode, base_path: &str) -> Vec<Error> {
    let mut errors = Vec::new();
    check_node(node, schema_node, base_path, &mut errors);
    errors
}

fn kind_compatible(data: NodeKind, schema: NodeKind) -> bool {
    data == schema
}

fn check_siblings(
    children: &[DataNode],
    schema_children: &[SchemaNode],
    parent_path: &str,
    top_level: bool,
    errors: &mut Vec<Error>,
) {
    let mut seen_leaves: HashSet<&str> = HashSet::new();
    let mut seen_instances: HashSet<String> = HashSet::new();

    for child in children {
        let sn = schema_children.iter().find(|s| s.name == child.name);
        let path = if top_level {
            // parent_path is "/module:"
            format!("{}{}", parent_path, child.name)
        } else {
            format!("{}/{}", parent_path, child.name)
        };
        let sn = match sn {
            Some(sn) => sn,
            None => {
                errors.push(Error::validation(
                    format!("unknown element '{}'", child.name),
                    path,
                ));
                continue;
            }
        };
        if !kind_compatible(child.kind, sn.kind) {
            errors.push(Error::validation(
                format!("element '{}' has unexpected kind", child.name),
                path,
            ));
            continue;
        }

        // duplicate detection
        match child.kind {
            NodeKind::Leaf | NodeKind::Container | NodeKind::PresenceContainer => {
                if !seen_leaves.insert(child.name.as_str()) {
                    errors.push(Error::validation(
                        format!("duplicate element '{}'", child.name),
                        path.clone(),
                    ));
                }
            }
            NodeKind::List => {
                let keys: Vec<String> = sn
                    .keys
                    .iter()
                    .map(|k| {
                        child
                            .child_leaf_value(k)
                            .map(|v| v.canonical())
                            .unwrap_or_default()
                    })
                    .collect();
                let identity = format!("{}\u{1f}{}", child.name, keys.join("\u{1f}"));
                if !seen_instances.insert(identity) {
                    errors.push(Error::validation(
                        format!("duplicate list instance '{}'", child.name),
                        path.clone(),
                    ));
                }
            }
            NodeKind::LeafList => {
                let identity = format!(
                    "{}\u{1f}{}",
                    child.name,
                    child.value.as_ref().map(|v| v.canonical()).unwrap_or_default()
                );
                if !seen_instances.insert(identity) {
                    errors.push(Error::validation(
                        format!("duplicate leaf-list value in '{}'", child.name),
                        path.clone(),
                    ));
                }
            }
            _ => {}
        }

        check_node(child, sn, &path, errors);
    }
}

fn check_node(node: &DataNode, sn: &SchemaNode, path: &str, errors: &mut Vec<Error>) {
    match sn.kind {
        NodeKind::Leaf | NodeKind::LeafList => {
            match (&node.value, &sn.leaf_type) {
                (Some(value), Some(ty)) => {
                    if !ty.accepts(value) {
                        errors.push(Error::validation(
                            format!(
                                "value of '{}' does not match its type ({})",
                                node.name,
                                value.type_name()
                            ),
                            path.to_string(),
                        ));
                    }
                }
                (None, _) => {
                    errors.push(Error::validation(
                        format!("leaf '{}' has no value", node.name),
                        path.to_string(),
                    ));
                }
                (_, None) => {}
            }
        }
        NodeKind::List => {
            for key in &sn.keys {
                if node.child_leaf_value(key).is_none() {
                    errors.push(Error::validation(
                        format!("list instance is missing key '{}'", key),
                        path.to_string(),
                    ));
                }
            }
        }
        _ => {}
    }

    if sn.kind.is_interior() {
        // mandatory children must be present under an existing parent
        for child_schema in &sn.children {
            if child_schema.mandatory
                && !node.children.iter().any(|c| c.name == child_schema.name)
            {
                errors.push(Error::validation(
                    format!("mandatory element '{}' is missing", child_schema.name),
                    format!("{}/{}", path, child_schema.name),
                ));
            }
        }
        check_siblings(&node.children, &sn.children, path, false, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::{IntWidth, Value};
    use crate::yang::tree::DataNode;

    fn schema() -> SchemaModule {
        serde_json::from_value(serde_json::json!({
            "name": "m",
            "prefix": "m",
            "nodes": [{
                "name": "c",
                "kind": "container",
                "children": [
                    { "name": "name", "kind": "leaf", "type": { "base": "string" }, "mandatory": true },
                    { "name": "count", "kind": "leaf", "type": { "base": "uint8" } },
                    { "name": "entries", "kind": "list", "keys": ["id"],
                      "children": [{ "name": "id", "kind": "leaf", "type": { "base": "string" } }] }
                ]
            }]
        }))
        .unwrap()
    }

    fn valid_tree() -> DataTree {
        let mut c = DataNode::interior("c", NodeKind::Container);
        c.children.push(DataNode::leaf("name", Value::String("n".into())));
        c.children.push(DataNode::leaf("count", Value::UInt(IntWidth::W8, 3)));
        let mut tree = DataTree::empty("m");
        tree.roots.push(c);
        tree
    }

    #[test]
    fn test_valid_tree_passes() {
        assert!(validate_tree(&valid_tree(), &schema()).is_empty());
    }

    #[test]
    fn test_missing_mandatory_leaf() {
        let mut tree = valid_tree();
        tree.roots[0].children.retain(|c| c.name != "name");
        let errors = validate_tree(&tree, &schema());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].xpath.as_deref(), Some("/m:c/name"));
    }

    #[test]
    fn test_unknown_element() {
        let mut tree = valid_tree();
        tree.roots[0]
            .children
            .push(DataNode::leaf("bogus", Value::Bool(true)));
        let errors = validate_tree(&tree, &schema());
        assert!(errors.iter().any(|e| e.message.contains("unknown element")));
    }

    #[test]
    fn test_type_mismatch() {
        let mut tree = valid_tree();
        for child in tree.roots[0].children.iter_mut() {
            if child.name == "count" {
                child.value = Some(Value::String("not-a-number".into()));
            }
        }
        let errors = validate_tree(&tree, &schema());
        assert!(errors.iter().any(|e| e.kind == crate::core::error::ErrorKind::ValidationFailed
            && e.xpath.as_deref() == Some("/m:c/count")));
    }

    #[test]
    fn test_duplicate_list_instance() {
        let mut tree = valid_tree();
        for _ in 0..2 {
            let mut entry = DataNode::interior("entries", NodeKind::List);
            entry.children.push(DataNode::leaf("id", Value::String("x".into())));
            tree.roots[0].children.push(entry);
        }
        let errors = validate_tree(&tree, &schema());
        assert!(errors.iter().any(|e| e.message.contains("duplicate list instance")));
    }

    #[test]
    fn test_missing_list_key() {
        let mut tree = valid_tree();
        tree.roots[0]
            .children
            .push(DataNode::interior("entries", NodeKind::List));
        let errors = validate_tree(&tree, &schema());
        assert!(errors.iter().any(|e| e.message.contains("missing key")));
    }

    #[test]
    fn test_all_errors_collected() {
        let mut tree = valid_tree();
        tree.roots[0].children.retain(|c| c.name != "name");
        tree.roots[0]
            .children
            .push(DataNode::leaf("bogus", Value::Bool(true)));
        let errors = validate_tree(&tree, &schema());
        assert_eq!(errors.len(), 2);
    }
}
