//! Schema catalog
//!
//! Loads, indexes and reference-counts schema modules and tracks their
//! feature and per-node enable state. Daemon mode loads every installed
//! module at startup; local mode loads lazily on first access. Imports
//! are loaded transitively before the requested module. All state is
//! behind one catalog-wide reader/writer lock.

mod loader;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ConnectionMode;
use crate::observability::{self, Event};
use crate::yang::schema::{SchemaModule, Submodule};

pub use loader::installed_modules;

/// Enable state of a schema node in the running datastore.
///
/// A node is effectively enabled if itself is enabled or any ancestor is
/// `EnabledWithChildren`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Disabled,
    Enabled,
    EnabledWithChildren,
}

/// Catalog view of one module, as returned by `info`.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub revision: Option<String>,
    pub prefix: String,
    pub enabled_features: Vec<String>,
    pub submodules: Vec<Submodule>,
    pub file_path: PathBuf,
    pub disabled: bool,
}

struct ModuleEntry {
    schema: Arc<SchemaModule>,
    file_path: PathBuf,
    enabled_features: BTreeSet<String>,
    disabled: bool,
    /// schema path → enable state; absent means disabled
    node_states: HashMap<String, NodeState>,
}

/// The schema catalog.
pub struct SchemaCatalog {
    schema_dir: PathBuf,
    mode: ConnectionMode,
    modules: RwLock<HashMap<String, ModuleEntry>>,
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SchemaCatalog {
    /// Create the catalog. In daemon mode every installed module is
    /// loaded immediately.
    pub fn new(schema_dir: impl Into<PathBuf>, mode: ConnectionMode) -> Result<Self> {
        let catalog = Self {
            schema_dir: schema_dir.into(),
            mode,
            modules: RwLock::new(HashMap::new()),
        };
        if mode == ConnectionMode::Daemon {
            for name in loader::installed_modules(&catalog.schema_dir)? {
                catalog.load(&name, None)?;
            }
        }
        Ok(catalog)
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Load a module (idempotent). Imports are loaded first.
    pub fn load(&self, name: &str, revision: Option<&str>) -> Result<Arc<SchemaModule>> {
        {
            let modules = read_guard(&self.modules);
            if let Some(entry) = modules.get(name) {
                if entry.disabled {
                    return Err(Error::not_found(format!("module '{}' is disabled", name)));
                }
                if revision.is_none() || entry.schema.revision.as_deref() == revision {
                    return Ok(Arc::clone(&entry.schema));
                }
            }
        }
        let mut in_progress = HashSet::new();
        self.load_with_imports(name, revision, &mut in_progress)
    }

    fn load_with_imports(
        &self,
        name: &str,
        revision: Option<&str>,
        in_progress: &mut HashSet<String>,
    ) -> Result<Arc<SchemaModule>> {
        if !in_progress.insert(name.to_string()) {
            return Err(Error::new(
                ErrorKind::InitFailed,
                format!("import cycle through module '{}'", name),
            ));
        }

        let path = loader::find_schema_file(&self.schema_dir, name, revision)?;
        let parsed = loader::parse_schema_file(&path)?;
        if parsed.name != name {
            return Err(Error::new(
                ErrorKind::InitFailed,
                format!("schema file '{}' declares module '{}'", path.display(), parsed.name),
            ));
        }

        // dependency closure first
        for import in parsed.imports.clone() {
            let already = {
                let modules = read_guard(&self.modules);
                modules.get(&import).map(|e| !e.disabled).unwrap_or(false)
            };
            if !already {
                self.load_with_imports(&import, None, in_progress)?;
            }
        }

        let schema = Arc::new(parsed);
        let mut modules = write_guard(&self.modules);
        let entry = modules.entry(name.to_string()).or_insert_with(|| ModuleEntry {
            schema: Arc::clone(&schema),
            file_path: path.clone(),
            enabled_features: BTreeSet::new(),
            disabled: false,
            node_states: HashMap::new(),
        });
        entry.schema = Arc::clone(&schema);
        entry.file_path = path;
        entry.disabled = false;

        observability::info(Event::ModuleLoaded, &[("module", name)]);
        Ok(schema)
    }

    /// The parsed schema of a loaded module; loads lazily in local mode.
    pub fn get(&self, name: &str) -> Result<Arc<SchemaModule>> {
        {
            let modules = read_guard(&self.modules);
            if let Some(entry) = modules.get(name) {
                if entry.disabled {
                    return Err(Error::not_found(format!("module '{}' is disabled", name)));
                }
                return Ok(Arc::clone(&entry.schema));
            }
        }
        match self.mode {
            ConnectionMode::Local => self.load(name, None),
            ConnectionMode::Daemon => Err(Error::unknown_model(name)),
        }
    }

    /// Whether a module is known and not disabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        let modules = read_guard(&self.modules);
        modules.get(name).map(|e| !e.disabled).unwrap_or(false)
    }

    /// Catalog info of one module.
    pub fn info(&self, name: &str) -> Result<ModuleInfo> {
        let modules = read_guard(&self.modules);
        let entry = modules.get(name).ok_or_else(|| Error::unknown_model(name))?;
        Ok(ModuleInfo {
            name: entry.schema.name.clone(),
            revision: entry.schema.revision.clone(),
            prefix: entry.schema.prefix.clone(),
            enabled_features: entry.enabled_features.iter().cloned().collect(),
            submodules: entry.schema.submodules.clone(),
            file_path: entry.file_path.clone(),
            disabled: entry.disabled,
        })
    }

    /// Info for every loaded module, sorted by name.
    pub fn list(&self) -> Vec<ModuleInfo> {
        let modules = read_guard(&self.modules);
        let mut out: Vec<ModuleInfo> = modules
            .values()
            .map(|entry| ModuleInfo {
                name: entry.schema.name.clone(),
                revision: entry.schema.revision.clone(),
                prefix: entry.schema.prefix.clone(),
                enabled_features: entry.enabled_features.iter().cloned().collect(),
                submodules: entry.schema.submodules.clone(),
                file_path: entry.file_path.clone(),
                disabled: entry.disabled,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Raw schema document text, for `get_schema`.
    pub fn schema_text(&self, name: &str, revision: Option<&str>) -> Result<String> {
        let path = loader::find_schema_file(&self.schema_dir, name, revision)?;
        std::fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("cannot read '{}': {}", path.display(), e)))
    }

    /// Flip a feature bit. The feature must be declared by the schema.
    pub fn set_feature(&self, name: &str, feature: &str, enabled: bool) -> Result<()> {
        let mut modules = write_guard(&self.modules);
        let entry = modules.get_mut(name).ok_or_else(|| Error::unknown_model(name))?;
        if !entry.schema.features.iter().any(|f| f == feature) {
            return Err(Error::bad_element(format!(
                "module '{}' has no feature '{}'",
                name, feature
            )));
        }
        if enabled {
            entry.enabled_features.insert(feature.to_string());
        } else {
            entry.enabled_features.remove(feature);
        }
        observability::info(
            Event::FeatureToggled,
            &[
                ("module", name),
                ("feature", feature),
                ("enabled", if enabled { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    /// Enabled features of a module.
    pub fn enabled_features(&self, name: &str) -> Result<Vec<String>> {
        let modules = read_guard(&self.modules);
        let entry = modules.get(name).ok_or_else(|| Error::unknown_model(name))?;
        Ok(entry.enabled_features.iter().cloned().collect())
    }

    /// Install a module: load it and clear any disabled flag.
    pub fn install(&self, name: &str, revision: Option<&str>) -> Result<()> {
        self.load(name, revision)?;
        observability::info(Event::ModuleInstalled, &[("module", name)]);
        Ok(())
    }

    /// Soft uninstall: the module is marked disabled and retained in
    /// memory. Reinstalling an uninstalled module requires a restart.
    pub fn uninstall(&self, name: &str) -> Result<()> {
        let mut modules = write_guard(&self.modules);
        let entry = modules.get_mut(name).ok_or_else(|| Error::unknown_model(name))?;
        entry.disabled = true;
        entry.node_states.clear();
        observability::info(Event::ModuleUninstalled, &[("module", name)]);
        Ok(())
    }

    /// Enable state of one schema node.
    pub fn node_state(&self, module: &str, schema_path: &str) -> NodeState {
        let modules = read_guard(&self.modules);
        modules
            .get(module)
            .and_then(|e| e.node_states.get(schema_path).copied())
            .unwrap_or_default()
    }

    /// Set the enable state of one schema node.
    pub fn set_node_state(&self, module: &str, schema_path: &str, state: NodeState) -> Result<()> {
        let mut modules = write_guard(&self.modules);
        let entry = modules.get_mut(module).ok_or_else(|| Error::unknown_model(module))?;
        if state == NodeState::Disabled {
            entry.node_states.remove(schema_path);
        } else {
            entry.node_states.insert(schema_path.to_string(), state);
        }
        Ok(())
    }

    /// Clear the enable state of a node and everything below it.
    pub fn disable_subtree(&self, module: &str, schema_path: &str) -> Result<()> {
        let mut modules = write_guard(&self.modules);
        let entry = modules.get_mut(module).ok_or_else(|| Error::unknown_model(module))?;
        let prefix = format!("{}/", schema_path);
        entry
            .node_states
            .retain(|path, _| path != schema_path && !path.starts_with(&prefix));
        Ok(())
    }

    /// A node is effectively enabled if itself is enabled or any
    /// ancestor is `EnabledWithChildren`.
    pub fn is_effectively_enabled(&self, module: &str, schema_path: &str) -> bool {
        let modules = read_guard(&self.modules);
        let entry = match modules.get(module) {
            Some(e) if !e.disabled => e,
            _ => return false,
        };
        match entry.node_states.get(schema_path) {
            Some(NodeState::Enabled) | Some(NodeState::EnabledWithChildren) => return true,
            _ => {}
        }
        let mut path = schema_path;
        while let Some(idx) = path.rfind('/') {
            if idx == 0 {
                break;
            }
            path = &path[..idx];
            if matches!(
                entry.node_states.get(path),
                Some(NodeState::EnabledWithChildren)
            ) {
                return true;
            }
        }
        false
    }

    /// Whether any node of the module is enabled in running.
    pub fn has_enabled_subtree(&self, module: &str) -> bool {
        let modules = read_guard(&self.modules);
        modules
            .get(module)
            .map(|e| {
                !e.disabled
                    && e.node_states
                        .values()
                        .any(|s| *s != NodeState::Disabled)
            })
            .unwrap_or(false)
    }

    /// Names of every loaded, non-disabled module.
    pub fn loaded_modules(&self) -> Vec<String> {
        let modules = read_guard(&self.modules);
        let mut names: Vec<String> = modules
            .iter()
            .filter(|(_, e)| !e.disabled)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_schema(dir: &std::path::Path, file: &str, doc: serde_json::Value) {
        fs::write(dir.join(file), serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    }

    fn simple(name: &str, imports: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "prefix": name,
            "features": ["f1"],
            "imports": imports,
            "nodes": [{ "name": "top", "kind": "container", "children": [] }]
        })
    }

    fn catalog(dir: &tempfile::TempDir) -> SchemaCatalog {
        SchemaCatalog::new(dir.path(), ConnectionMode::Local).unwrap()
    }

    #[test]
    fn test_lazy_load_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);

        let first = cat.load("m", None).unwrap();
        let second = cat.load("m", None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_imports_loaded_transitively() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "base.json", simple("base", &[]));
        write_schema(dir.path(), "mid.json", simple("mid", &["base"]));
        write_schema(dir.path(), "top.json", simple("top", &["mid"]));
        let cat = catalog(&dir);

        cat.load("top", None).unwrap();
        assert_eq!(cat.loaded_modules(), vec!["base", "mid", "top"]);
    }

    #[test]
    fn test_import_cycle_detected() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "a.json", simple("a", &["b"]));
        write_schema(dir.path(), "b.json", simple("b", &["a"]));
        let cat = catalog(&dir);

        let err = cat.load("a", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitFailed);
    }

    #[test]
    fn test_daemon_mode_loads_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "a.json", simple("a", &[]));
        write_schema(dir.path(), "b.json", simple("b", &[]));
        let cat = SchemaCatalog::new(dir.path(), ConnectionMode::Daemon).unwrap();
        assert_eq!(cat.loaded_modules(), vec!["a", "b"]);
    }

    #[test]
    fn test_feature_toggle() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);
        cat.load("m", None).unwrap();

        cat.set_feature("m", "f1", true).unwrap();
        assert_eq!(cat.enabled_features("m").unwrap(), vec!["f1"]);
        cat.set_feature("m", "f1", false).unwrap();
        assert!(cat.enabled_features("m").unwrap().is_empty());

        let err = cat.set_feature("m", "nope", true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadElement);
    }

    #[test]
    fn test_soft_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);
        cat.load("m", None).unwrap();

        cat.uninstall("m").unwrap();
        assert!(!cat.is_enabled("m"));
        assert!(cat.get("m").is_err());
        // still known to info()
        assert!(cat.info("m").unwrap().disabled);
    }

    #[test]
    fn test_node_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);
        cat.load("m", None).unwrap();

        assert_eq!(cat.node_state("m", "/m:top"), NodeState::Disabled);
        cat.set_node_state("m", "/m:top", NodeState::Enabled).unwrap();
        assert_eq!(cat.node_state("m", "/m:top"), NodeState::Enabled);
        cat.set_node_state("m", "/m:top", NodeState::EnabledWithChildren)
            .unwrap();
        assert!(cat.is_effectively_enabled("m", "/m:top/child/grandchild"));
    }

    #[test]
    fn test_effective_enablement_requires_ancestor_with_children() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);
        cat.load("m", None).unwrap();

        cat.set_node_state("m", "/m:top", NodeState::Enabled).unwrap();
        assert!(cat.is_effectively_enabled("m", "/m:top"));
        assert!(!cat.is_effectively_enabled("m", "/m:top/child"));
    }

    #[test]
    fn test_disable_subtree_clears_descendants() {
        let dir = tempfile::tempdir().unwrap();
        write_schema(dir.path(), "m.json", simple("m", &[]));
        let cat = catalog(&dir);
        cat.load("m", None).unwrap();

        cat.set_node_state("m", "/m:top", NodeState::Enabled).unwrap();
        cat.set_node_state("m", "/m:top/child", NodeState::Enabled).unwrap();
        cat.disable_subtree("m", "/m:top").unwrap();
        assert!(!cat.has_enabled_subtree("m"));
    }
}
