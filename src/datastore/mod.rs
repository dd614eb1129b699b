//! Datastore file layer
//!
//! On-disk trees per `(module, datastore)` and the access-control shim
//! that brackets every open with the caller's identity.

mod access;
mod files;

pub use access::AccessControl;
pub use files::{DataFiles, FileMeta, StoredTree};
