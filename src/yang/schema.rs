//! Schema model
//!
//! Modules are declarative JSON documents loaded from the schema search
//! directory. A module carries a tree of schema nodes; list nodes name
//! their key leaves, leaves carry a type and an optional default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::value::{IntWidth, Value};

/// Kind of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Container,
    PresenceContainer,
    List,
    Leaf,
    LeafList,
    Rpc,
    Action,
    Notification,
    Input,
    Output,
}

impl NodeKind {
    /// True for nodes that carry child data nodes.
    pub fn is_interior(&self) -> bool {
        matches!(
            self,
            NodeKind::Container
                | NodeKind::PresenceContainer
                | NodeKind::List
                | NodeKind::Rpc
                | NodeKind::Action
                | NodeKind::Notification
                | NodeKind::Input
                | NodeKind::Output
        )
    }

    /// True for leaf and leaf-list nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Leaf | NodeKind::LeafList)
    }

    /// True for operation nodes (rpc, action, notification).
    pub fn is_operation(&self) -> bool {
        matches!(self, NodeKind::Rpc | NodeKind::Action | NodeKind::Notification)
    }
}

/// Leaf type as declared in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "kebab-case")]
pub enum LeafType {
    String,
    Bool,
    Empty,
    Binary,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64 { fraction_digits: u8 },
    Enumeration { values: Vec<String> },
    Bits { flags: Vec<String> },
    Identityref,
    InstanceIdentifier,
    Union { types: Vec<LeafType> },
}

impl LeafType {
    /// Parse the textual form of a value of this type.
    pub fn parse_text(&self, text: &str) -> Result<Value> {
        let parse_int = |width: IntWidth| -> Result<Value> {
            let v: i64 = text
                .parse()
                .map_err(|_| Error::invalid_argument(format!("'{}' is not a valid integer", text)))?;
            let (lo, hi) = width.signed_bounds();
            if v < lo || v > hi {
                return Err(Error::invalid_argument(format!("value {} out of range", v)));
            }
            Ok(Value::Int(width, v))
        };
        let parse_uint = |width: IntWidth| -> Result<Value> {
            let v: u64 = text
                .parse()
                .map_err(|_| Error::invalid_argument(format!("'{}' is not a valid unsigned integer", text)))?;
            if v > width.unsigned_max() {
                return Err(Error::invalid_argument(format!("value {} out of range", v)));
            }
            Ok(Value::UInt(width, v))
        };
        match self {
            LeafType::String => Ok(Value::String(text.to_string())),
            LeafType::Bool => match text {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(Error::invalid_argument(format!("'{}' is not a boolean", other))),
            },
            LeafType::Empty => {
                if text.is_empty() {
                    Ok(Value::Empty)
                } else {
                    Err(Error::invalid_argument("empty leaf takes no value"))
                }
            }
            LeafType::Binary => {
                if text.len() % 2 != 0 || !text.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(Error::invalid_argument("binary value must be hex encoded"));
                }
                let bytes = (0..text.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&text[i..i + 2], 16).unwrap())
                    .collect();
                Ok(Value::Binary(bytes))
            }
            LeafType::Int8 => parse_int(IntWidth::W8),
            LeafType::Int16 => parse_int(IntWidth::W16),
            LeafType::Int32 => parse_int(IntWidth::W32),
            LeafType::Int64 => parse_int(IntWidth::W64),
            LeafType::Uint8 => parse_uint(IntWidth::W8),
            LeafType::Uint16 => parse_uint(IntWidth::W16),
            LeafType::Uint32 => parse_uint(IntWidth::W32),
            LeafType::Uint64 => parse_uint(IntWidth::W64),
            LeafType::Decimal64 { fraction_digits } => {
                let digits = *fraction_digits;
                let (int_part, frac_part) = match text.split_once('.') {
                    Some((i, f)) => (i, f),
                    None => (text, ""),
                };
                if frac_part.len() > digits as usize {
                    return Err(Error::invalid_argument("too many fraction digits"));
                }
                let negative = int_part.starts_with('-');
                let int_val: i64 = int_part
                    .parse()
                    .map_err(|_| Error::invalid_argument(format!("'{}' is not a decimal64", text)))?;
                let mut frac_val: i64 = if frac_part.is_empty() {
                    0
                } else {
                    frac_part
                        .parse()
                        .map_err(|_| Error::invalid_argument(format!("'{}' is not a decimal64", text)))?
                };
                for _ in frac_part.len()..digits as usize {
                    frac_val *= 10;
                }
                let scale = 10i64.pow(digits as u32);
                let scaled = int_val * scale + if negative { -frac_val } else { frac_val };
                Ok(Value::Decimal64(scaled, digits))
            }
            LeafType::Enumeration { values } => {
                if values.iter().any(|v| v == text) {
                    Ok(Value::Enum(text.to_string()))
                } else {
                    Err(Error::invalid_argument(format!("'{}' is not a valid enum value", text)))
                }
            }
            LeafType::Bits { flags } => {
                let mut set = std::collections::BTreeSet::new();
                for bit in text.split_whitespace() {
                    if !flags.iter().any(|f| f == bit) {
                        return Err(Error::invalid_argument(format!("'{}' is not a valid bit", bit)));
                    }
                    set.insert(bit.to_string());
                }
                Ok(Value::Bits(set))
            }
            LeafType::Identityref => Ok(Value::IdentityRef(text.to_string())),
            LeafType::InstanceIdentifier => Ok(Value::InstanceId(text.to_string())),
            LeafType::Union { types } => {
                for ty in types {
                    if let Ok(v) = ty.parse_text(text) {
                        return Ok(Value::Union(Box::new(v)));
                    }
                }
                Err(Error::invalid_argument(format!("'{}' matches no member of the union", text)))
            }
        }
    }

    /// Check a typed value against this declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (LeafType::String, Value::String(_)) => true,
            (LeafType::Bool, Value::Bool(_)) => true,
            (LeafType::Empty, Value::Empty) => true,
            (LeafType::Binary, Value::Binary(_)) => true,
            (LeafType::Int8, Value::Int(IntWidth::W8, _)) => true,
            (LeafType::Int16, Value::Int(IntWidth::W16, _)) => true,
            (LeafType::Int32, Value::Int(IntWidth::W32, _)) => true,
            (LeafType::Int64, Value::Int(IntWidth::W64, _)) => true,
            (LeafType::Uint8, Value::UInt(IntWidth::W8, _)) => true,
            (LeafType::Uint16, Value::UInt(IntWidth::W16, _)) => true,
            (LeafType::Uint32, Value::UInt(IntWidth::W32, _)) => true,
            (LeafType::Uint64, Value::UInt(IntWidth::W64, _)) => true,
            (LeafType::Decimal64 { fraction_digits }, Value::Decimal64(_, d)) => *fraction_digits == *d,
            (LeafType::Enumeration { values }, Value::Enum(v)) => values.iter().any(|x| x == v),
            (LeafType::Bits { flags }, Value::Bits(set)) => set.iter().all(|b| flags.iter().any(|f| f == b)),
            (LeafType::Identityref, Value::IdentityRef(_)) => true,
            (LeafType::InstanceIdentifier, Value::InstanceId(_)) => true,
            (LeafType::Union { types }, Value::Union(inner)) => types.iter().any(|t| t.accepts(inner)),
            (LeafType::Union { types }, v) => types.iter().any(|t| t.accepts(v)),
            _ => false,
        }
    }
}

/// A node in the schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    /// Node name
    pub name: String,
    /// Node kind
    pub kind: NodeKind,
    /// Leaf/leaf-list type
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub leaf_type: Option<LeafType>,
    /// Key leaf names, in declaration order (lists only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Whether a value must be present under an existing parent
    #[serde(default)]
    pub mandatory: bool,
    /// Textual default value (leaves only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// False for state (operational) data
    #[serde(default = "default_true")]
    pub config: bool,
    /// True for user-ordered lists and leaf-lists
    #[serde(default)]
    pub user_ordered: bool,
    /// Feature guarding this node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_feature: Option<String>,
    /// Child schema nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaNode>,
}

fn default_true() -> bool {
    true
}

impl SchemaNode {
    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Submodule reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submodule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// A schema module identified by `(name, revision?)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModule {
    /// Module name
    pub name: String,
    /// Revision date, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Namespace prefix used in instance identifiers
    pub prefix: String,
    /// XML namespace, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Features the module declares
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    /// Modules this one imports or augments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    /// Included submodules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<Submodule>,
    /// Top-level schema nodes
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
}

impl SchemaModule {
    /// Find a top-level node by name.
    pub fn top_node(&self, name: &str) -> Option<&SchemaNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Resolve a sequence of child names from the module root.
    pub fn resolve(&self, steps: &[&str]) -> Option<&SchemaNode> {
        let mut iter = steps.iter();
        let first = iter.next()?;
        let mut node = self.top_node(first)?;
        for step in iter {
            node = node.child(step)?;
        }
        Some(node)
    }

    /// Schema path of a node sequence, e.g. `/mod:a/b`.
    pub fn schema_path(&self, steps: &[&str]) -> String {
        let mut path = String::new();
        for (i, step) in steps.iter().enumerate() {
            if i == 0 {
                path.push_str(&format!("/{}:{}", self.name, step));
            } else {
                path.push('/');
                path.push_str(step);
            }
        }
        path
    }

    /// Index of top-level node names to their subtree, used by enable logic.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a SchemaNode, &str)) {
        fn rec<'a>(
            node: &'a SchemaNode,
            path: &str,
            visit: &mut impl FnMut(&'a SchemaNode, &str),
        ) {
            let here = format!("{}/{}", path, node.name);
            visit(node, &here);
            for child in &node.children {
                rec(child, &here, visit);
            }
        }
        for node in &self.nodes {
            let here = format!("/{}:{}", self.name, node.name);
            visit(node, &here);
            for child in &node.children {
                rec(child, &here, &mut visit);
            }
        }
    }

    /// Validate internal consistency of the schema document itself.
    pub fn check_structure(&self) -> Result<()> {
        fn rec(module: &str, node: &SchemaNode) -> Result<()> {
            match node.kind {
                NodeKind::Leaf | NodeKind::LeafList => {
                    if node.leaf_type.is_none() {
                        return Err(Error::new(
                            crate::core::error::ErrorKind::InitFailed,
                            format!("leaf '{}' in module '{}' has no type", node.name, module),
                        ));
                    }
                }
                NodeKind::List => {
                    for key in &node.keys {
                        let child = node.child(key);
                        match child {
                            Some(c) if c.kind == NodeKind::Leaf => {}
                            _ => {
                                return Err(Error::new(
                                    crate::core::error::ErrorKind::InitFailed,
                                    format!("list '{}' key '{}' is not a leaf", node.name, key),
                                ))
                            }
                        }
                    }
                }
                _ => {}
            }
            for child in &node.children {
                rec(module, child)?;
            }
            Ok(())
        }
        for node in &self.nodes {
            rec(&self.name, node)?;
        }
        Ok(())
    }
}

/// Map of feature name to enabled flag, kept per module by the catalog.
pub type FeatureSet = HashMap<String, bool>;

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, ty: LeafType) -> SchemaNode {
        SchemaNode {
            name: name.into(),
            kind: NodeKind::Leaf,
            leaf_type: Some(ty),
            keys: vec![],
            mandatory: false,
            default: None,
            config: true,
            user_ordered: false,
            if_feature: None,
            children: vec![],
        }
    }

    fn sample_module() -> SchemaModule {
        SchemaModule {
            name: "test-module".into(),
            revision: Some("2016-03-01".into()),
            prefix: "tm".into(),
            namespace: None,
            features: vec![],
            imports: vec![],
            submodules: vec![],
            nodes: vec![SchemaNode {
                name: "main".into(),
                kind: NodeKind::Container,
                leaf_type: None,
                keys: vec![],
                mandatory: false,
                default: None,
                config: true,
                user_ordered: false,
                if_feature: None,
                children: vec![leaf("i8", LeafType::Int8)],
            }],
        }
    }

    #[test]
    fn test_resolve_nested_node() {
        let module = sample_module();
        let node = module.resolve(&["main", "i8"]).unwrap();
        assert_eq!(node.kind, NodeKind::Leaf);
        assert!(module.resolve(&["main", "missing"]).is_none());
    }

    #[test]
    fn test_schema_path_rendering() {
        let module = sample_module();
        assert_eq!(module.schema_path(&["main", "i8"]), "/test-module:main/i8");
    }

    #[test]
    fn test_parse_int_range() {
        assert!(LeafType::Int8.parse_text("127").is_ok());
        assert!(LeafType::Int8.parse_text("128").is_err());
        assert!(LeafType::Uint16.parse_text("-1").is_err());
    }

    #[test]
    fn test_parse_decimal64() {
        let v = LeafType::Decimal64 { fraction_digits: 2 }.parse_text("12.5").unwrap();
        assert_eq!(v, Value::Decimal64(1250, 2));
        assert_eq!(v.canonical(), "12.50");
    }

    #[test]
    fn test_parse_enum_rejects_unknown() {
        let ty = LeafType::Enumeration {
            values: vec!["a".into(), "b".into()],
        };
        assert!(ty.parse_text("a").is_ok());
        assert!(ty.parse_text("c").is_err());
    }

    #[test]
    fn test_union_tries_members_in_order() {
        let ty = LeafType::Union {
            types: vec![LeafType::Int32, LeafType::String],
        };
        assert_eq!(
            ty.parse_text("42").unwrap(),
            Value::Union(Box::new(Value::Int(IntWidth::W32, 42)))
        );
        assert_eq!(
            ty.parse_text("forty-two").unwrap(),
            Value::Union(Box::new(Value::String("forty-two".into())))
        );
    }

    #[test]
    fn test_check_structure_flags_untyped_leaf() {
        let mut module = sample_module();
        module.nodes[0].children[0].leaf_type = None;
        assert!(module.check_structure().is_err());
    }

    #[test]
    fn test_schema_round_trips_through_json() {
        let module = sample_module();
        let json = serde_json::to_string_pretty(&module).unwrap();
        let back: SchemaModule = serde_json::from_str(&json).unwrap();
        assert_eq!(module, back);
    }
}
