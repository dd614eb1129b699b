//! Persistence manager boundary
//!
//! An external collaborator persists feature state, per-module
//! enabled-in-running flags and durable subscription metadata. The core
//! consumes this interface after schema load, on subscription churn and
//! for procedure fan-out; `FilePersistence` is the default file-backed
//! implementation.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Durable view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub module: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    pub destination: String,
    pub id: u32,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub enable_running: bool,
}

/// Interface the core consumes; wire-agnostic and replaceable.
pub trait PersistenceManager: Send + Sync {
    /// Features to apply after a module's schema is loaded.
    fn module_features(&self, module: &str) -> Result<Vec<String>>;

    /// Persist a feature flip.
    fn set_module_feature(&self, module: &str, feature: &str, enabled: bool) -> Result<()>;

    /// Whether the module is enabled in the running datastore.
    fn module_enabled_running(&self, module: &str) -> Result<bool>;

    /// Persist the module-level running enablement.
    fn set_module_enabled_running(&self, module: &str, enabled: bool) -> Result<()>;

    /// Subtrees enabled in running, as schema paths.
    fn enabled_subtrees(&self, module: &str) -> Result<Vec<String>>;

    /// Persist a subtree enablement change.
    fn set_subtree_enabled(&self, module: &str, xpath: &str, enabled: bool) -> Result<()>;

    /// Durable subscriptions of a module.
    fn subscriptions(&self, module: &str) -> Result<Vec<SubscriptionRecord>>;

    /// Persist one subscription.
    fn persist_subscription(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Drop one persisted subscription.
    fn remove_subscription(&self, module: &str, id: u32) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistDoc {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    enabled_running: bool,
    #[serde(default)]
    enabled_subtrees: Vec<String>,
    #[serde(default)]
    subscriptions: Vec<SubscriptionRecord>,
}

/// File-backed persistence: one JSON document per module.
pub struct FilePersistence {
    dir: PathBuf,
    // serializes read-modify-write cycles
    io: Mutex<()>,
}

impl FilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("cannot create persist directory: {}", e)))?;
        Ok(Self {
            dir,
            io: Mutex::new(()),
        })
    }

    fn path(&self, module: &str) -> PathBuf {
        self.dir.join(format!("{}.json", module))
    }

    fn read(&self, module: &str) -> Result<PersistDoc> {
        match fs::read(self.path(module)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistDoc::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, module: &str, doc: &PersistDoc) -> Result<()> {
        let rendered = serde_json::to_vec_pretty(doc)?;
        fs::write(self.path(module), rendered)
            .map_err(|e| Error::io(format!("cannot persist module '{}': {}", module, e)))
    }

    fn update(&self, module: &str, apply: impl FnOnce(&mut PersistDoc)) -> Result<()> {
        let _io = self.io.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.read(module)?;
        apply(&mut doc);
        self.write(module, &doc)
    }
}

impl PersistenceManager for FilePersistence {
    fn module_features(&self, module: &str) -> Result<Vec<String>> {
        Ok(self.read(module)?.features)
    }

    fn set_module_feature(&self, module: &str, feature: &str, enabled: bool) -> Result<()> {
        self.update(module, |doc| {
            doc.features.retain(|f| f != feature);
            if enabled {
                doc.features.push(feature.to_string());
            }
        })
    }

    fn module_enabled_running(&self, module: &str) -> Result<bool> {
        Ok(self.read(module)?.enabled_running)
    }

    fn set_module_enabled_running(&self, module: &str, enabled: bool) -> Result<()> {
        self.update(module, |doc| doc.enabled_running = enabled)
    }

    fn enabled_subtrees(&self, module: &str) -> Result<Vec<String>> {
        Ok(self.read(module)?.enabled_subtrees)
    }

    fn set_subtree_enabled(&self, module: &str, xpath: &str, enabled: bool) -> Result<()> {
        self.update(module, |doc| {
            doc.enabled_subtrees.retain(|x| x != xpath);
            if enabled {
                doc.enabled_subtrees.push(xpath.to_string());
            }
        })
    }

    fn subscriptions(&self, module: &str) -> Result<Vec<SubscriptionRecord>> {
        Ok(self.read(module)?.subscriptions)
    }

    fn persist_subscription(&self, record: &SubscriptionRecord) -> Result<()> {
        let record = record.clone();
        self.update(&record.module.clone(), move |doc| {
            doc.subscriptions.retain(|s| s.id != record.id);
            doc.subscriptions.push(record);
        })
    }

    fn remove_subscription(&self, module: &str, id: u32) -> Result<()> {
        self.update(module, |doc| doc.subscriptions.retain(|s| s.id != id))
    }
}
