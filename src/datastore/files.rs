//! Datastore files
//!
//! One serialized tree per `(module, datastore)`, stored as canonical
//! JSON with an integrity header. The header carries a crc32 checksum of
//! the tree payload and a monotonic version counter incremented on every
//! save; the counter is the primary commit-freshness test. A companion
//! `.lock` file exists per datastore file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Datastore;
use crate::observability::{self, Event};
use crate::yang::tree::DataTree;

const FILE_FORMAT: u32 = 1;

/// Metadata of a stored tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    /// Monotonic save counter; 0 for files without a header
    pub version: u64,
    /// Filesystem mtime at load time
    pub mtime: Option<SystemTime>,
}

/// A tree loaded from disk together with its metadata.
#[derive(Debug, Clone)]
pub struct StoredTree {
    pub tree: DataTree,
    pub meta: FileMeta,
}

#[derive(Serialize, Deserialize)]
struct FileDoc {
    format: u32,
    version: u64,
    saved_at: DateTime<Utc>,
    checksum: u32,
    tree: DataTree,
}

/// Path layout and serialization of datastore files.
pub struct DataFiles {
    data_dir: PathBuf,
}

impl DataFiles {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the serialized tree of `(module, datastore)`.
    pub fn data_path(&self, module: &str, datastore: Datastore) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}.json", module, datastore.suffix()))
    }

    /// Path of the companion lock file.
    pub fn lock_path(&self, module: &str, datastore: Datastore) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}.lock", module, datastore.suffix()))
    }

    /// Metadata of the stored file, `None` when absent.
    pub fn meta(&self, module: &str, datastore: Datastore) -> Result<Option<FileMeta>> {
        let path = self.data_path(module, datastore);
        let fs_meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc = self.read_doc(&path)?;
        Ok(Some(FileMeta {
            version: doc.map(|d| d.version).unwrap_or(0),
            mtime: fs_meta.modified().ok(),
        }))
    }

    /// Load the stored tree of `(module, datastore)`, `None` when absent.
    pub fn load(&self, module: &str, datastore: Datastore) -> Result<Option<StoredTree>> {
        let path = self.data_path(module, datastore);
        let fs_meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc = match self.read_doc(&path)? {
            Some(doc) => doc,
            None => return Ok(None),
        };

        let payload = serde_json::to_vec(&doc.tree)?;
        let checksum = crc32fast::hash(&payload);
        if checksum != doc.checksum {
            observability::error(
                Event::FileCorrupt,
                &[("file", &path.display().to_string())],
            );
            return Err(Error::io(format!(
                "checksum mismatch in '{}'",
                path.display()
            )));
        }

        Ok(Some(StoredTree {
            tree: doc.tree,
            meta: FileMeta {
                version: doc.version,
                mtime: fs_meta.modified().ok(),
            },
        }))
    }

    /// Load the stored tree or an empty one when the file is absent.
    pub fn load_or_empty(&self, module: &str, datastore: Datastore) -> Result<StoredTree> {
        match self.load(module, datastore)? {
            Some(stored) => Ok(stored),
            None => Ok(StoredTree {
                tree: DataTree::empty(module),
                meta: FileMeta {
                    version: 0,
                    mtime: None,
                },
            }),
        }
    }

    /// Persist a tree: truncate, serialize, fsync.
    ///
    /// The stored version counter is advanced past both the previous
    /// on-disk version and `min_version`.
    pub fn save(
        &self,
        tree: &DataTree,
        datastore: Datastore,
        min_version: u64,
    ) -> Result<FileMeta> {
        let path = self.data_path(&tree.module, datastore);
        let previous = self
            .read_doc(&path)
            .ok()
            .flatten()
            .map(|d| d.version)
            .unwrap_or(0);
        let version = previous.max(min_version) + 1;

        let payload = serde_json::to_vec(tree)?;
        let doc = FileDoc {
            format: FILE_FORMAT,
            version,
            saved_at: Utc::now(),
            checksum: crc32fast::hash(&payload),
            tree: tree.clone(),
        };

        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => Error::new(
                    ErrorKind::Unauthorized,
                    format!("no permission to write '{}'", path.display()),
                ),
                _ => Error::io(format!("cannot open '{}': {}", path.display(), e)),
            })?;

        let rendered = serde_json::to_vec_pretty(&doc)?;
        if let Err(e) = file.write_all(&rendered).and_then(|_| file.sync_all()) {
            observability::error(
                Event::FileWriteFailed,
                &[("file", &path.display().to_string()), ("error", &e.to_string())],
            );
            return Err(Error::io(format!(
                "write of '{}' failed: {}",
                path.display(),
                e
            )));
        }

        let mtime = fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        Ok(FileMeta { version, mtime })
    }

    /// Remove the stored tree, ignoring absence.
    pub fn remove(&self, module: &str, datastore: Datastore) -> Result<()> {
        let path = self.data_path(module, datastore);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_doc(&self, path: &Path) -> Result<Option<FileDoc>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(Error::new(
                    ErrorKind::Unauthorized,
                    format!("no permission to read '{}'", path.display()),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let doc: FileDoc = serde_json::from_slice(&bytes)
            .map_err(|e| Error::io(format!("malformed datastore file '{}': {}", path.display(), e)))?;
        Ok(Some(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::yang::schema::NodeKind;
    use crate::yang::tree::DataNode;

    fn sample_tree() -> DataTree {
        let mut main = DataNode::interior("main", NodeKind::Container);
        main.children
            .push(DataNode::leaf("name", Value::String("x".into())));
        let mut tree = DataTree::empty("test-module");
        tree.roots.push(main);
        tree
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path());
        let tree = sample_tree();

        let meta = files.save(&tree, Datastore::Startup, 0).unwrap();
        assert_eq!(meta.version, 1);

        let stored = files.load("test-module", Datastore::Startup).unwrap().unwrap();
        assert_eq!(stored.tree, tree);
        assert_eq!(stored.meta.version, 1);
    }

    #[test]
    fn test_version_counter_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path());
        let tree = sample_tree();

        assert_eq!(files.save(&tree, Datastore::Running, 0).unwrap().version, 1);
        assert_eq!(files.save(&tree, Datastore::Running, 0).unwrap().version, 2);
        // a caller that has observed version 10 never goes backwards
        assert_eq!(files.save(&tree, Datastore::Running, 10).unwrap().version, 11);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path());
        assert!(files.load("nope", Datastore::Running).unwrap().is_none());
        assert!(files.meta("nope", Datastore::Running).unwrap().is_none());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path());
        files.save(&sample_tree(), Datastore::Startup, 0).unwrap();

        let path = files.data_path("test-module", Datastore::Startup);
        let text = fs::read_to_string(&path).unwrap();
        let tampered = text.replace("\"x\"", "\"y\"");
        fs::write(&path, tampered).unwrap();

        let err = files.load("test-module", Datastore::Startup).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
        assert!(err.message.contains("checksum"));
    }

    #[test]
    fn test_datastores_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = DataFiles::new(dir.path());
        files.save(&sample_tree(), Datastore::Startup, 0).unwrap();
        assert!(files.load("test-module", Datastore::Running).unwrap().is_none());
    }

    #[test]
    fn test_lock_path_is_companion() {
        let files = DataFiles::new("/tmp/ds");
        assert_eq!(
            files.lock_path("m", Datastore::Running),
            PathBuf::from("/tmp/ds/m.running.lock")
        );
    }
}
