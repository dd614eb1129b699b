//! Schema and data-tree library
//!
//! Self-contained model of YANG-shaped schemas and data trees:
//! declarative JSON schema documents, parsed data trees with ordered
//! children, a restricted-XPath path language, validation and an
//! ordered tree diff.

pub mod diff;
pub mod path;
pub mod schema;
pub mod tree;
pub mod validate;

pub use diff::{diff_trees, DiffEntry, DiffOp};
pub use path::{Predicate, Step, XPath};
pub use schema::{LeafType, NodeKind, SchemaModule, SchemaNode, Submodule};
pub use tree::{DataNode, DataTree, MovePosition, Selected};
pub use validate::{validate_subtree, validate_tree};
