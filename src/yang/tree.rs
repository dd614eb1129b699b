//! Data trees
//!
//! A `DataTree` holds the parsed configuration of one module in one
//! datastore. Children keep document order; user-ordered lists and
//! leaf-lists are reordered only through `move_node`.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::value::{Item, Value};
use crate::yang::path::{Predicate, Step, XPath};
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};

/// One node of a data tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    /// Node name
    pub name: String,
    /// Schema kind of this node
    pub kind: NodeKind,
    /// Leaf payload; `None` for interior nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// True when materialized from a schema default
    #[serde(default)]
    pub default: bool,
    /// Child data nodes, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DataNode>,
}

impl DataNode {
    /// Create an interior node.
    pub fn interior(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            value: None,
            default: false,
            children: Vec::new(),
        }
    }

    /// Create a leaf node.
    pub fn leaf(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Leaf,
            value: Some(value),
            default: false,
            children: Vec::new(),
        }
    }

    /// Create a leaf-list entry.
    pub fn leaf_list_entry(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::LeafList,
            value: Some(value),
            default: false,
            children: Vec::new(),
        }
    }

    /// Value of a direct child leaf, by name.
    pub fn child_leaf_value(&self, name: &str) -> Option<&Value> {
        self.children
            .iter()
            .find(|c| c.name == name && c.kind == NodeKind::Leaf)
            .and_then(|c| c.value.as_ref())
    }

    /// True when this node matches a path step (name and predicates).
    pub fn matches(&self, step: &Step) -> bool {
        if self.name != step.name {
            return false;
        }
        for pred in &step.predicates {
            match pred {
                Predicate::Key { name, value } => {
                    match self.child_leaf_value(name) {
                        Some(v) if v.canonical() == *value => {}
                        _ => return false,
                    }
                }
                Predicate::Value(v) => match &self.value {
                    Some(own) if own.canonical() == *v => {}
                    _ => return false,
                },
            }
        }
        true
    }

    /// Indexes of children matching a step.
    pub fn matching_children(&self, step: &Step) -> Vec<usize> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.matches(step))
            .map(|(i, _)| i)
            .collect()
    }

    /// Predicate suffix of this node's instance identifier.
    fn predicate_suffix(&self, schema: Option<&SchemaNode>) -> String {
        let mut suffix = String::new();
        match self.kind {
            NodeKind::List => {
                if let Some(sn) = schema {
                    for key in &sn.keys {
                        if let Some(v) = self.child_leaf_value(key) {
                            suffix.push_str(&format!("[{}='{}']", key, v.canonical()));
                        }
                    }
                }
            }
            NodeKind::LeafList => {
                if let Some(v) = &self.value {
                    suffix.push_str(&format!("[.='{}']", v.canonical()));
                }
            }
            _ => {}
        }
        suffix
    }

    /// Instance identifier of this node under `parent_path`.
    pub fn instance_fragment(&self, parent_path: &str, schema: Option<&SchemaNode>) -> String {
        format!("{}/{}{}", parent_path, self.name, self.predicate_suffix(schema))
    }

    /// Instance identifier of this node as a top-level node of `module`.
    pub fn root_instance(&self, module: &str, schema: Option<&SchemaNode>) -> String {
        format!("/{}:{}{}", module, self.name, self.predicate_suffix(schema))
    }

    /// The item this node contributes to a read result.
    pub fn to_item(&self, path: String) -> Item {
        let value = match self.kind {
            NodeKind::Container => Value::Container { presence: false },
            NodeKind::PresenceContainer => Value::Container { presence: true },
            NodeKind::List => Value::List,
            _ => self.value.clone().unwrap_or(Value::Unknown),
        };
        Item {
            path,
            value,
            default: self.default,
        }
    }
}

/// The parsed data of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTree {
    /// Owning module name
    pub module: String,
    /// Top-level nodes, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<DataNode>,
}

/// A node reference paired with its full instance identifier.
pub struct Selected<'a> {
    pub node: &'a DataNode,
    pub path: String,
    pub schema: Option<&'a SchemaNode>,
}

impl DataTree {
    pub fn empty(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            roots: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Select all nodes matching a path, with their instance identifiers.
    pub fn select<'a>(&'a self, schema: &'a SchemaModule, path: &XPath) -> Vec<Selected<'a>> {
        let mut out = Vec::new();
        let mut frontier: Vec<(&DataNode, String, Option<&SchemaNode>)> = Vec::new();

        let first = match path.steps.first() {
            Some(s) => s,
            None => return out,
        };
        for root in &self.roots {
            if root.matches(first) {
                let sn = schema.top_node(&root.name);
                frontier.push((root, root.root_instance(&self.module, sn), sn));
            }
        }

        for step in path.steps.iter().skip(1) {
            let mut next = Vec::new();
            for (node, node_path, sn) in frontier {
                for idx in node.matching_children(step) {
                    let child = &node.children[idx];
                    let child_sn = sn.and_then(|s| s.child(&child.name));
                    let child_path = child.instance_fragment(&node_path, child_sn);
                    next.push((child, child_path, child_sn));
                }
            }
            frontier = next;
        }

        for (node, p, sn) in frontier {
            out.push(Selected {
                node,
                path: p,
                schema: sn,
            });
        }
        out
    }

    /// Find the unique node addressed by a path.
    ///
    /// Returns `Ok(None)` when absent, an error when the path addresses
    /// more than one instance.
    pub fn find<'a>(&'a self, schema: &'a SchemaModule, path: &XPath) -> Result<Option<Selected<'a>>> {
        let mut selected = self.select(schema, path);
        match selected.len() {
            0 => Ok(None),
            1 => Ok(Some(selected.remove(0))),
            _ => Err(Error::with_xpath(
                crate::core::error::ErrorKind::InvalidArgument,
                "path addresses more than one instance",
                path.to_string(),
            )),
        }
    }

    /// Mutable access to the unique node addressed by a path.
    ///
    /// Intermediate steps must also address a single instance.
    pub fn find_mut(&mut self, path: &XPath) -> Result<Option<&mut DataNode>> {
        fn rec<'a>(
            children: &'a mut [DataNode],
            steps: &[Step],
            full: &XPath,
        ) -> Result<Option<&'a mut DataNode>> {
            let step = &steps[0];
            let matches: Vec<usize> = children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.matches(step))
                .map(|(i, _)| i)
                .collect();
            match matches.len() {
                0 => Ok(None),
                1 => {
                    let node = &mut children[matches[0]];
                    if steps.len() == 1 {
                        Ok(Some(node))
                    } else {
                        rec(&mut node.children, &steps[1..], full)
                    }
                }
                _ => Err(Error::with_xpath(
                    crate::core::error::ErrorKind::InvalidArgument,
                    "path addresses more than one instance",
                    full.to_string(),
                )),
            }
        }
        if path.steps.is_empty() {
            return Ok(None);
        }
        rec(&mut self.roots, &path.steps, path)
    }

    /// Delete all nodes matching a path. Returns the number removed.
    pub fn delete(&mut self, path: &XPath) -> usize {
        fn rec(children: &mut Vec<DataNode>, steps: &[Step]) -> usize {
            let step = &steps[0];
            if steps.len() == 1 {
                let before = children.len();
                children.retain(|c| !c.matches(step));
                return before - children.len();
            }
            let mut removed = 0;
            for child in children.iter_mut() {
                if child.matches(step) {
                    removed += rec(&mut child.children, &steps[1..]);
                }
            }
            removed
        }
        if path.steps.is_empty() {
            return 0;
        }
        rec(&mut self.roots, &path.steps)
    }

    /// Collect result items for a read of `path`.
    ///
    /// With `descendants`, every value-bearing node below each match is
    /// emitted in document order; otherwise the matches themselves are.
    pub fn collect_items(&self, schema: &SchemaModule, path: &XPath, config_only: bool) -> Vec<Item> {
        fn walk(
            node: &DataNode,
            node_path: &str,
            sn: Option<&SchemaNode>,
            config_only: bool,
            out: &mut Vec<Item>,
        ) {
            if config_only && sn.map(|s| !s.config).unwrap_or(false) {
                return;
            }
            match node.kind {
                NodeKind::Leaf | NodeKind::LeafList | NodeKind::PresenceContainer => {
                    out.push(node.to_item(node_path.to_string()));
                }
                _ => {}
            }
            for child in &node.children {
                let child_sn = sn.and_then(|s| s.child(&child.name));
                let child_path = child.instance_fragment(node_path, child_sn);
                walk(child, &child_path, child_sn, config_only, out);
            }
        }

        let mut out = Vec::new();
        for sel in self.select(schema, path) {
            if config_only && sel.schema.map(|s| !s.config).unwrap_or(false) {
                continue;
            }
            if path.descendants {
                for child in &sel.node.children {
                    let child_sn = sel.schema.and_then(|s| s.child(&child.name));
                    let child_path = child.instance_fragment(&sel.path, child_sn);
                    walk(child, &child_path, child_sn, config_only, &mut out);
                }
            } else {
                out.push(sel.node.to_item(sel.path.clone()));
            }
        }
        out
    }

    /// Materialize default leaves inside every existing interior node.
    pub fn add_defaults(&mut self, schema: &SchemaModule) {
        fn rec(node: &mut DataNode, sn: &SchemaNode) {
            for child_schema in &sn.children {
                if child_schema.kind == NodeKind::Leaf {
                    if let Some(default) = &child_schema.default {
                        let present = node.children.iter().any(|c| c.name == child_schema.name);
                        if !present {
                            if let Some(ty) = &child_schema.leaf_type {
                                if let Ok(value) = ty.parse_text(default) {
                                    let mut leaf = DataNode::leaf(child_schema.name.clone(), value);
                                    leaf.default = true;
                                    node.children.push(leaf);
                                }
                            }
                        }
                    }
                }
            }
            for child in node.children.iter_mut() {
                if let Some(child_schema) = sn.child(&child.name) {
                    if child_schema.kind.is_interior() {
                        rec(child, child_schema);
                    }
                }
            }
        }
        for root in self.roots.iter_mut() {
            if let Some(sn) = schema.top_node(&root.name) {
                if sn.kind.is_interior() {
                    rec(root, sn);
                }
            }
        }
    }

    /// Remove leaves that were materialized from defaults.
    pub fn strip_defaults(&mut self) {
        fn rec(children: &mut Vec<DataNode>) {
            children.retain(|c| !c.default);
            for child in children.iter_mut() {
                rec(&mut child.children);
            }
        }
        rec(&mut self.roots);
    }

    /// Remove state (config=false) subtrees.
    pub fn strip_state(&mut self, schema: &SchemaModule) {
        fn rec(children: &mut Vec<DataNode>, sn: &SchemaNode) {
            children.retain(|c| sn.child(&c.name).map(|s| s.config).unwrap_or(true));
            for child in children.iter_mut() {
                if let Some(child_schema) = sn.child(&child.name) {
                    rec(&mut child.children, child_schema);
                }
            }
        }
        self.roots
            .retain(|r| schema.top_node(&r.name).map(|s| s.config).unwrap_or(true));
        for root in self.roots.iter_mut() {
            if let Some(sn) = schema.top_node(&root.name) {
                rec(&mut root.children, sn);
            }
        }
    }

    /// Keep only top-level subtrees whose schema root is enabled.
    pub fn retain_enabled_roots(&mut self, enabled: impl Fn(&str) -> bool) {
        let module = self.module.clone();
        self.roots
            .retain(|r| enabled(&format!("/{}:{}", module, r.name)));
    }

    /// Move a user-ordered list instance or leaf-list entry.
    pub fn move_node(
        &mut self,
        path: &XPath,
        position: MovePosition,
        relative: Option<&XPath>,
    ) -> Result<()> {
        let parent_steps = &path.steps[..path.steps.len() - 1];
        let target_step = path.last();

        let siblings: &mut Vec<DataNode> = if parent_steps.is_empty() {
            &mut self.roots
        } else {
            let parent_path = XPath {
                module: path.module.clone(),
                steps: parent_steps.to_vec(),
                descendants: false,
            };
            match self.find_mut(&parent_path)? {
                Some(parent) => &mut parent.children,
                None => return Err(Error::data_missing(path.to_string())),
            }
        };

        let from = siblings
            .iter()
            .position(|c| c.matches(target_step))
            .ok_or_else(|| Error::not_found(format!("item '{}' does not exist", path)))?;
        let moved = siblings.remove(from);

        let group_start = siblings.iter().position(|c| c.name == moved.name);
        let group_end = siblings
            .iter()
            .rposition(|c| c.name == moved.name)
            .map(|i| i + 1);

        let to = match position {
            MovePosition::First => group_start.unwrap_or(siblings.len()),
            MovePosition::Last => group_end.unwrap_or(siblings.len()),
            MovePosition::Before | MovePosition::After => {
                let rel = relative.ok_or_else(|| {
                    Error::invalid_argument("relative item required for before/after move")
                })?;
                let rel_step = rel.last();
                let anchor = siblings
                    .iter()
                    .position(|c| c.matches(rel_step))
                    .ok_or_else(|| Error::not_found(format!("relative item '{}' does not exist", rel)))?;
                if position == MovePosition::Before {
                    anchor
                } else {
                    anchor + 1
                }
            }
        };
        siblings.insert(to.min(siblings.len()), moved);
        Ok(())
    }
}

/// Position selector for `move_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovePosition {
    First,
    Last,
    Before,
    After,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::IntWidth;
    use crate::yang::schema::LeafType;

    fn schema() -> SchemaModule {
        serde_json::from_value(serde_json::json!({
            "name": "test-module",
            "prefix": "tm",
            "nodes": [{
                "name": "main",
                "kind": "container",
                "children": [
                    { "name": "i8", "kind": "leaf", "type": { "base": "int8" } },
                    { "name": "numbers", "kind": "leaf-list", "type": { "base": "uint8" }, "user_ordered": true },
                    { "name": "list", "kind": "list", "keys": ["k"], "user_ordered": true,
                      "children": [
                          { "name": "k", "kind": "leaf", "type": { "base": "string" } },
                          { "name": "v", "kind": "leaf", "type": { "base": "string" }, "default": "dv" }
                      ] }
                ]
            }]
        }))
        .unwrap()
    }

    fn sample_tree() -> DataTree {
        let mut main = DataNode::interior("main", NodeKind::Container);
        main.children.push(DataNode::leaf("i8", Value::Int(IntWidth::W8, 1)));
        for n in [1u64, 2, 42] {
            main.children
                .push(DataNode::leaf_list_entry("numbers", Value::UInt(IntWidth::W8, n)));
        }
        let mut tree = DataTree::empty("test-module");
        tree.roots.push(main);
        tree
    }

    #[test]
    fn test_select_leaf() {
        let tree = sample_tree();
        let path = XPath::parse("/test-module:main/i8").unwrap();
        let sch = schema();
        let sel = tree.select(&sch, &path);
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].path, "/test-module:main/i8");
    }

    #[test]
    fn test_select_leaflist_by_value() {
        let tree = sample_tree();
        let path = XPath::parse("/test-module:main/numbers[.='42']").unwrap();
        let sch = schema();
        let sel = tree.select(&sch, &path);
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].path, "/test-module:main/numbers[.='42']");
    }

    #[test]
    fn test_select_all_leaflist_entries() {
        let tree = sample_tree();
        let path = XPath::parse("/test-module:main/numbers").unwrap();
        assert_eq!(tree.select(&schema(), &path).len(), 3);
    }

    #[test]
    fn test_collect_items_subtree() {
        let tree = sample_tree();
        let path = XPath::parse("/test-module:main//*").unwrap();
        let items = tree.collect_items(&schema(), &path, false);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].path, "/test-module:main/i8");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut tree = sample_tree();
        let path = XPath::parse("/test-module:main/i8").unwrap();
        assert_eq!(tree.delete(&path), 1);
        assert_eq!(tree.delete(&path), 0);
    }

    #[test]
    fn test_move_after() {
        let mut tree = sample_tree();
        let path = XPath::parse("/test-module:main/numbers[.='1']").unwrap();
        let rel = XPath::parse("/test-module:main/numbers[.='42']").unwrap();
        tree.move_node(&path, MovePosition::After, Some(&rel)).unwrap();

        let all = XPath::parse("/test-module:main/numbers").unwrap();
        let values: Vec<String> = tree
            .select(&schema(), &all)
            .iter()
            .map(|s| s.node.value.as_ref().unwrap().canonical())
            .collect();
        assert_eq!(values, vec!["2", "42", "1"]);
    }

    #[test]
    fn test_move_first() {
        let mut tree = sample_tree();
        let path = XPath::parse("/test-module:main/numbers[.='42']").unwrap();
        tree.move_node(&path, MovePosition::First, None).unwrap();
        let all = XPath::parse("/test-module:main/numbers").unwrap();
        let values: Vec<String> = tree
            .select(&schema(), &all)
            .iter()
            .map(|s| s.node.value.as_ref().unwrap().canonical())
            .collect();
        assert_eq!(values, vec!["42", "1", "2"]);
    }

    #[test]
    fn test_move_missing_item_fails() {
        let mut tree = sample_tree();
        let path = XPath::parse("/test-module:main/numbers[.='99']").unwrap();
        let err = tree.move_node(&path, MovePosition::Last, None).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_add_and_strip_defaults() {
        let sch = schema();
        let mut tree = DataTree::empty("test-module");
        let mut main = DataNode::interior("main", NodeKind::Container);
        let mut list = DataNode::interior("list", NodeKind::List);
        list.children.push(DataNode::leaf("k", Value::String("x".into())));
        main.children.push(list);
        tree.roots.push(main);

        tree.add_defaults(&sch);
        let path = XPath::parse("/test-module:main/list[k='x']/v").unwrap();
        let sel = tree.select(&sch, &path);
        assert_eq!(sel.len(), 1);
        assert!(sel[0].node.default);
        assert_eq!(sel[0].node.value.as_ref().unwrap().canonical(), "dv");

        tree.strip_defaults();
        assert!(tree.select(&sch, &path).is_empty());
    }

    #[test]
    fn test_list_keys_render_in_schema_order() {
        let sch = schema();
        let mut tree = DataTree::empty("test-module");
        let mut main = DataNode::interior("main", NodeKind::Container);
        let mut list = DataNode::interior("list", NodeKind::List);
        list.children.push(DataNode::leaf("k", Value::String("a".into())));
        list.children.push(DataNode::leaf("v", Value::String("b".into())));
        main.children.push(list);
        tree.roots.push(main);

        let path = XPath::parse("/test-module:main/list[k='a']").unwrap();
        let sel = tree.select(&sch, &path);
        assert_eq!(sel[0].path, "/test-module:main/list[k='a']");

        let leaf = XPath::parse("/test-module:main/list[k='a']/v").unwrap();
        let sel = tree.select(&sch, &leaf);
        assert_eq!(sel[0].path, "/test-module:main/list[k='a']/v");
        assert!(matches!(
            sch.resolve(&["main", "list", "v"]).unwrap().leaf_type,
            Some(LeafType::String)
        ));
    }
}
