//! Edit application
//!
//! Pure tree mutations shared by live edits and op-log replay. `Strict`
//! requires the target to be absent (set) or present (delete);
//! `NonRecursive` disables creation of missing ancestors and forbids
//! deleting non-empty containers and lists. Setting a leaf-list appends.

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::value::Value;
use crate::dm::session::EditOptions;
use crate::yang::path::{Step, XPath};
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};
use crate::yang::tree::{DataNode, DataTree, MovePosition};

/// Resolve the schema node a path addresses.
pub fn resolve_schema<'a>(schema: &'a SchemaModule, path: &XPath) -> Result<&'a SchemaNode> {
    schema.resolve(&path.step_names()).ok_or_else(|| {
        Error::with_xpath(
            ErrorKind::BadElement,
            "path does not match the schema",
            path.to_string(),
        )
    })
}

/// Apply a set operation.
pub fn apply_set(
    schema: &SchemaModule,
    tree: &mut DataTree,
    path: &XPath,
    value: Option<Value>,
    opts: EditOptions,
) -> Result<()> {
    let target_schema = resolve_schema(schema, path)?;

    // coerce textual payloads against the declared leaf type
    let value = match (&target_schema.leaf_type, value) {
        (Some(ty), Some(v)) => {
            if ty.accepts(&v) {
                Some(v)
            } else if let Value::String(text) = &v {
                Some(ty.parse_text(text).map_err(|e| {
                    Error::with_xpath(e.kind, e.message, path.to_string())
                })?)
            } else {
                return Err(Error::with_xpath(
                    ErrorKind::InvalidArgument,
                    format!("value type '{}' does not match the schema", v.type_name()),
                    path.to_string(),
                ));
            }
        }
        (Some(ty), None) => {
            // value may be carried by a leaf-list predicate
            match path.last().value_predicate() {
                Some(text) => Some(ty.parse_text(text).map_err(|e| {
                    Error::with_xpath(e.kind, e.message, path.to_string())
                })?),
                None if matches!(ty, crate::yang::schema::LeafType::Empty) => Some(Value::Empty),
                None => {
                    return Err(Error::with_xpath(
                        ErrorKind::InvalidArgument,
                        "a value is required for this leaf",
                        path.to_string(),
                    ))
                }
            }
        }
        (None, Some(_)) => {
            return Err(Error::with_xpath(
                ErrorKind::InvalidArgument,
                "a value is not allowed on an interior node",
                path.to_string(),
            ))
        }
        (None, None) => None,
    };

    let parent_children = ensure_ancestors(schema, tree, path, opts)?;

    let last = path.last();
    match target_schema.kind {
        NodeKind::Leaf => {
            if let Some(idx) = parent_children.iter().position(|c| c.matches(last)) {
                if opts.strict {
                    return Err(Error::data_exists(path.to_string()));
                }
                let node = &mut parent_children[idx];
                node.value = value;
                node.default = opts.default;
            } else {
                let mut node = DataNode::leaf(
                    last.name.clone(),
                    value.ok_or_else(|| {
                        Error::with_xpath(
                            ErrorKind::InvalidArgument,
                            "a value is required for this leaf",
                            path.to_string(),
                        )
                    })?,
                );
                node.default = opts.default;
                parent_children.push(node);
            }
        }
        NodeKind::LeafList => {
            let value = value.ok_or_else(|| {
                Error::with_xpath(
                    ErrorKind::InvalidArgument,
                    "a value is required for this leaf-list",
                    path.to_string(),
                )
            })?;
            let duplicate = parent_children.iter().any(|c| {
                c.name == last.name && c.value.as_ref().map(|v| v.canonical()) == Some(value.canonical())
            });
            if duplicate {
                if opts.strict {
                    return Err(Error::data_exists(path.to_string()));
                }
                return Ok(());
            }
            // append after the last entry of the group
            let insert_at = parent_children
                .iter()
                .rposition(|c| c.name == last.name)
                .map(|i| i + 1)
                .unwrap_or(parent_children.len());
            parent_children.insert(insert_at, DataNode::leaf_list_entry(last.name.clone(), value));
        }
        NodeKind::Container | NodeKind::PresenceContainer | NodeKind::List => {
            if parent_children.iter().any(|c| c.matches(last)) {
                if opts.strict {
                    return Err(Error::data_exists(path.to_string()));
                }
                return Ok(());
            }
            let node = build_interior(target_schema, last, path)?;
            parent_children.push(node);
        }
        _ => {
            return Err(Error::with_xpath(
                ErrorKind::InvalidArgument,
                "operation nodes cannot be edited",
                path.to_string(),
            ))
        }
    }
    Ok(())
}

/// Apply a delete operation. Returns the number of removed instances.
pub fn apply_delete(
    schema: &SchemaModule,
    tree: &mut DataTree,
    path: &XPath,
    opts: EditOptions,
) -> Result<usize> {
    resolve_schema(schema, path)?;

    if opts.non_recursive {
        let matches = tree.select(schema, path);
        if matches
            .iter()
            .any(|s| s.node.kind.is_interior() && !s.node.children.is_empty())
        {
            return Err(Error::with_xpath(
                ErrorKind::DataExists,
                "cannot delete a non-empty node non-recursively",
                path.to_string(),
            ));
        }
    }

    let removed = tree.delete(path);
    if removed == 0 && opts.strict {
        return Err(Error::data_missing(path.to_string()));
    }
    Ok(removed)
}

/// Apply a move operation on a user-ordered list or leaf-list.
pub fn apply_move(
    schema: &SchemaModule,
    tree: &mut DataTree,
    path: &XPath,
    position: MovePosition,
    relative: Option<&XPath>,
) -> Result<()> {
    let target_schema = resolve_schema(schema, path)?;
    if !target_schema.user_ordered {
        return Err(Error::with_xpath(
            ErrorKind::InvalidArgument,
            "item is not user-ordered",
            path.to_string(),
        ));
    }
    tree.move_node(path, position, relative)
}

/// Walk to the parent of the last step, creating missing ancestors
/// unless `non_recursive` is set.
fn ensure_ancestors<'a>(
    schema: &SchemaModule,
    tree: &'a mut DataTree,
    path: &XPath,
    opts: EditOptions,
) -> Result<&'a mut Vec<DataNode>> {
    let steps = &path.steps[..path.steps.len() - 1];
    let mut schema_children: &[SchemaNode] = &schema.nodes;
    let mut children: &mut Vec<DataNode> = &mut tree.roots;

    for step in steps {
        let sn = schema_children
            .iter()
            .find(|s| s.name == step.name)
            .ok_or_else(|| {
                Error::with_xpath(
                    ErrorKind::BadElement,
                    format!("unknown element '{}'", step.name),
                    path.to_string(),
                )
            })?;

        let existing = {
            let matches: Vec<usize> = children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.matches(step))
                .map(|(i, _)| i)
                .collect();
            match matches.len() {
                0 => None,
                1 => Some(matches[0]),
                _ => {
                    return Err(Error::with_xpath(
                        ErrorKind::InvalidArgument,
                        "path addresses more than one instance",
                        path.to_string(),
                    ))
                }
            }
        };

        let idx = match existing {
            Some(idx) => idx,
            None => {
                if opts.non_recursive {
                    return Err(Error::data_missing(path.to_string()));
                }
                let node = build_interior(sn, step, path)?;
                children.push(node);
                children.len() - 1
            }
        };
        schema_children = &sn.children;
        children = &mut children[idx].children;
    }
    Ok(children)
}

/// Build an interior node for a step, filling list keys from predicates.
fn build_interior(sn: &SchemaNode, step: &Step, path: &XPath) -> Result<DataNode> {
    let mut node = DataNode::interior(step.name.clone(), sn.kind);
    if sn.kind == NodeKind::List {
        for key in &sn.keys {
            let value = step.key_value(key).ok_or_else(|| {
                Error::with_xpath(
                    ErrorKind::InvalidArgument,
                    format!("missing value of key '{}'", key),
                    path.to_string(),
                )
            })?;
            let key_schema = sn.child(key).ok_or_else(|| {
                Error::with_xpath(
                    ErrorKind::BadElement,
                    format!("unknown key '{}'", key),
                    path.to_string(),
                )
            })?;
            let ty = key_schema.leaf_type.as_ref().ok_or_else(|| {
                Error::with_xpath(ErrorKind::Internal, "key leaf has no type", path.to_string())
            })?;
            let parsed = ty
                .parse_text(value)
                .map_err(|e| Error::with_xpath(e.kind, e.message, path.to_string()))?;
            node.children.push(DataNode::leaf(key.clone(), parsed));
        }
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::IntWidth;

    fn schema() -> SchemaModule {
        serde_json::from_value(serde_json::json!({
            "name": "example-module",
            "prefix": "ex",
            "nodes": [{
                "name": "container",
                "kind": "container",
                "children": [{
                    "name": "list",
                    "kind": "list",
                    "keys": ["key1", "key2"],
                    "children": [
                        { "name": "key1", "kind": "leaf", "type": { "base": "string" } },
                        { "name": "key2", "kind": "leaf", "type": { "base": "string" } },
                        { "name": "leaf", "kind": "leaf", "type": { "base": "string" } }
                    ]
                },
                { "name": "numbers", "kind": "leaf-list", "type": { "base": "uint8" }, "user_ordered": true }]
            }]
        }))
        .unwrap()
    }

    fn set(tree: &mut DataTree, path: &str, value: Option<Value>, opts: EditOptions) -> Result<()> {
        apply_set(&schema(), tree, &XPath::parse(path).unwrap(), value, opts)
    }

    #[test]
    fn test_set_creates_ancestors() {
        let mut tree = DataTree::empty("example-module");
        set(
            &mut tree,
            "/example-module:container/list[key1='a'][key2='b']/leaf",
            Some(Value::String("L".into())),
            EditOptions::default(),
        )
        .unwrap();

        let path = XPath::parse("/example-module:container/list[key1='a'][key2='b']/leaf").unwrap();
        let sch = schema();
        let sel = tree.select(&sch, &path);
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].node.value.as_ref().unwrap().canonical(), "L");

        // key leaves were created from the predicates
        let key = XPath::parse("/example-module:container/list[key1='a'][key2='b']/key1").unwrap();
        assert_eq!(tree.select(&schema(), &key).len(), 1);
    }

    #[test]
    fn test_set_non_recursive_requires_ancestors() {
        let mut tree = DataTree::empty("example-module");
        let err = set(
            &mut tree,
            "/example-module:container/list[key1='a'][key2='b']/leaf",
            Some(Value::String("L".into())),
            EditOptions {
                non_recursive: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataMissing);
    }

    #[test]
    fn test_set_strict_rejects_existing_leaf() {
        let mut tree = DataTree::empty("example-module");
        let path = "/example-module:container/list[key1='a'][key2='b']/leaf";
        set(&mut tree, path, Some(Value::String("1".into())), EditOptions::default()).unwrap();

        let err = set(
            &mut tree,
            path,
            Some(Value::String("2".into())),
            EditOptions {
                strict: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataExists);

        // non-strict replaces
        set(&mut tree, path, Some(Value::String("2".into())), EditOptions::default()).unwrap();
        let sch = schema();
        let sel = tree.select(&sch, &XPath::parse(path).unwrap());
        assert_eq!(sel[0].node.value.as_ref().unwrap().canonical(), "2");
    }

    #[test]
    fn test_leaflist_appends_in_order() {
        let mut tree = DataTree::empty("example-module");
        for n in ["1", "2", "42"] {
            set(
                &mut tree,
                "/example-module:container/numbers",
                Some(Value::String(n.into())),
                EditOptions::default(),
            )
            .unwrap();
        }
        let all = XPath::parse("/example-module:container/numbers").unwrap();
        let values: Vec<String> = tree
            .select(&schema(), &all)
            .iter()
            .map(|s| s.node.value.as_ref().unwrap().canonical())
            .collect();
        assert_eq!(values, vec!["1", "2", "42"]);
        // textual payloads were coerced to the declared type
        assert!(matches!(
            tree.select(&schema(), &all)[0].node.value,
            Some(Value::UInt(IntWidth::W8, 1))
        ));
    }

    #[test]
    fn test_string_coercion_failure() {
        let mut tree = DataTree::empty("example-module");
        let err = set(
            &mut tree,
            "/example-module:container/numbers",
            Some(Value::String("not-a-number".into())),
            EditOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_delete_idempotent_and_strict() {
        let mut tree = DataTree::empty("example-module");
        let path = "/example-module:container/numbers";
        set(&mut tree, path, Some(Value::String("1".into())), EditOptions::default()).unwrap();

        let parsed = XPath::parse(path).unwrap();
        assert_eq!(apply_delete(&schema(), &mut tree, &parsed, EditOptions::default()).unwrap(), 1);
        assert_eq!(apply_delete(&schema(), &mut tree, &parsed, EditOptions::default()).unwrap(), 0);

        let err = apply_delete(
            &schema(),
            &mut tree,
            &parsed,
            EditOptions {
                strict: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataMissing);
    }

    #[test]
    fn test_delete_non_recursive_rejects_populated_container() {
        let mut tree = DataTree::empty("example-module");
        set(
            &mut tree,
            "/example-module:container/numbers",
            Some(Value::String("1".into())),
            EditOptions::default(),
        )
        .unwrap();

        let container = XPath::parse("/example-module:container").unwrap();
        let err = apply_delete(
            &schema(),
            &mut tree,
            &container,
            EditOptions {
                non_recursive: true,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataExists);

        // recursive delete removes the subtree
        assert_eq!(
            apply_delete(&schema(), &mut tree, &container, EditOptions::default()).unwrap(),
            1
        );
    }

    #[test]
    fn test_move_rejects_unordered() {
        let mut tree = DataTree::empty("example-module");
        set(
            &mut tree,
            "/example-module:container/list[key1='a'][key2='b']/leaf",
            Some(Value::String("x".into())),
            EditOptions::default(),
        )
        .unwrap();
        let leaf = XPath::parse("/example-module:container/list[key1='a'][key2='b']/leaf").unwrap();
        let err = apply_move(&schema(), &mut tree, &leaf, MovePosition::First, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_unknown_element_rejected() {
        let mut tree = DataTree::empty("example-module");
        let err = set(
            &mut tree,
            "/example-module:container/bogus",
            Some(Value::String("x".into())),
            EditOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadElement);
    }
}
