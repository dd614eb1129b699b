//! Typed leaf payloads
//!
//! A `Value` is the typed payload of a data node; an `Item` pairs it with
//! the absolute instance identifier it was read from or is written to.
//! Ownership passes with the value on every boundary crossing.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer widths supported by the schema type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    /// Inclusive signed bounds of this width.
    pub fn signed_bounds(&self) -> (i64, i64) {
        match self {
            IntWidth::W8 => (i8::MIN as i64, i8::MAX as i64),
            IntWidth::W16 => (i16::MIN as i64, i16::MAX as i64),
            IntWidth::W32 => (i32::MIN as i64, i32::MAX as i64),
            IntWidth::W64 => (i64::MIN, i64::MAX),
        }
    }

    /// Inclusive unsigned upper bound of this width.
    pub fn unsigned_max(&self) -> u64 {
        match self {
            IntWidth::W8 => u8::MAX as u64,
            IntWidth::W16 => u16::MAX as u64,
            IntWidth::W32 => u32::MAX as u64,
            IntWidth::W64 => u64::MAX,
        }
    }
}

/// Typed value payload.
///
/// `Decimal64` carries the scaled integer and the number of fraction
/// digits. `Container { presence }` distinguishes presence containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Binary(Vec<u8>),
    Bits(BTreeSet<String>),
    Bool(bool),
    Decimal64(i64, u8),
    Enum(String),
    IdentityRef(String),
    InstanceId(String),
    Int(IntWidth, i64),
    UInt(IntWidth, u64),
    String(String),
    Empty,
    Container { presence: bool },
    List,
    Union(Box<Value>),
    Unknown,
}

impl Value {
    /// Returns the type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Binary(_) => "binary",
            Value::Bits(_) => "bits",
            Value::Bool(_) => "bool",
            Value::Decimal64(..) => "decimal64",
            Value::Enum(_) => "enum",
            Value::IdentityRef(_) => "identityref",
            Value::InstanceId(_) => "instance-identifier",
            Value::Int(..) => "int",
            Value::UInt(..) => "uint",
            Value::String(_) => "string",
            Value::Empty => "empty",
            Value::Container { presence: false } => "container",
            Value::Container { presence: true } => "container-presence",
            Value::List => "list",
            Value::Union(_) => "union",
            Value::Unknown => "unknown",
        }
    }

    /// True if this value represents an interior node rather than a leaf.
    pub fn is_interior(&self) -> bool {
        matches!(self, Value::Container { .. } | Value::List)
    }

    /// Canonical textual rendering, used for list-key matching and diffs.
    pub fn canonical(&self) -> String {
        match self {
            Value::Binary(b) => b.iter().map(|x| format!("{:02x}", x)).collect(),
            Value::Bits(set) => set.iter().cloned().collect::<Vec<_>>().join(" "),
            Value::Bool(b) => b.to_string(),
            Value::Decimal64(v, digits) => {
                let divisor = 10i64.pow(*digits as u32);
                format!("{}.{:0width$}", v / divisor, (v % divisor).abs(), width = *digits as usize)
            }
            Value::Enum(s) | Value::IdentityRef(s) | Value::InstanceId(s) | Value::String(s) => s.clone(),
            Value::Int(_, v) => v.to_string(),
            Value::UInt(_, v) => v.to_string(),
            Value::Empty => String::new(),
            Value::Container { .. } => String::new(),
            Value::List => String::new(),
            Value::Union(inner) => inner.canonical(),
            Value::Unknown => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A value bound to its absolute instance identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Absolute instance identifier
    pub path: String,
    /// Typed payload
    pub value: Value,
    /// True when the value was materialized from a schema default
    #[serde(default)]
    pub default: bool,
}

impl Item {
    /// Create an item for an explicitly set value.
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            default: false,
        }
    }

    /// Create an item materialized from a schema default.
    pub fn from_default(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
            default: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_decimal() {
        assert_eq!(Value::Decimal64(12345, 2).canonical(), "123.45");
        assert_eq!(Value::Decimal64(-12345, 2).canonical(), "-123.45");
    }

    #[test]
    fn test_canonical_bits_is_sorted() {
        let mut set = BTreeSet::new();
        set.insert("b".to_string());
        set.insert("a".to_string());
        assert_eq!(Value::Bits(set).canonical(), "a b");
    }

    #[test]
    fn test_int_width_bounds() {
        assert_eq!(IntWidth::W8.signed_bounds(), (-128, 127));
        assert_eq!(IntWidth::W16.unsigned_max(), 65535);
    }

    #[test]
    fn test_interior_values() {
        assert!(Value::Container { presence: false }.is_interior());
        assert!(Value::List.is_interior());
        assert!(!Value::String("x".into()).is_interior());
    }

    #[test]
    fn test_item_round_trips_through_json() {
        let item = Item::new("/m:c/leaf", Value::Int(IntWidth::W32, -7));
        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}
