//! Remote-procedure and event-notification validation
//!
//! Each validator constructs a temporary tree rooted at the schema
//! operation, attaches the input or output arguments as nodes, runs
//! schema validation and re-reads the materialized arguments so that
//! default nodes added along the way are visible to the caller. Actions
//! and event notifications additionally require their target data path
//! to exist in the session's running view.

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Datastore;
use crate::core::value::Item;
use crate::yang::path::XPath;
use crate::yang::schema::{NodeKind, SchemaModule, SchemaNode};
use crate::yang::tree::{DataNode, DataTree};
use crate::yang::validate::validate_subtree;

use super::session::{EditOptions, Session};
use super::{edit, DataManager};

/// The three procedure shapes the data manager validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Rpc,
    Action,
    EventNotification,
}

impl ProcedureKind {
    fn schema_kind(&self) -> NodeKind {
        match self {
            ProcedureKind::Rpc => NodeKind::Rpc,
            ProcedureKind::Action => NodeKind::Action,
            ProcedureKind::EventNotification => NodeKind::Notification,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Rpc => "rpc",
            ProcedureKind::Action => "action",
            ProcedureKind::EventNotification => "event-notification",
        }
    }
}

impl DataManager {
    /// Validate procedure arguments and return them with defaults
    /// materialized. `input` selects the argument direction for rpc and
    /// action procedures; event notifications carry their arguments
    /// directly under the notification node.
    pub fn validate_procedure(
        &self,
        session: &mut Session,
        kind: ProcedureKind,
        xpath: &str,
        args: &[Item],
        input: bool,
    ) -> Result<Vec<Item>> {
        let path = XPath::parse(xpath)?;
        let schema = self.catalog.get(&path.module)?;
        let op_schema = edit::resolve_schema(&schema, &path)?;
        if op_schema.kind != kind.schema_kind() {
            return Err(Error::with_xpath(
                ErrorKind::InvalidArgument,
                format!("'{}' is not an {}", xpath, kind.as_str()),
                xpath,
            ));
        }

        // actions and notifications are anchored in existing data
        if matches!(kind, ProcedureKind::Action | ProcedureKind::EventNotification) {
            if let Some(parent) = path.parent() {
                self.check_exists_in_running(session, &parent)?;
            }
        }

        let op_schema_path = schema.schema_path(&path.step_names());
        let direction = match kind {
            ProcedureKind::Rpc | ProcedureKind::Action => {
                Some(if input { "input" } else { "output" })
            }
            ProcedureKind::EventNotification => None,
        };
        let allowed_prefix = match direction {
            Some(dir) => format!("{}/{}", op_schema_path, dir),
            None => op_schema_path.clone(),
        };

        // build the temporary tree rooted at the operation
        let mut tree = DataTree::empty(path.module.clone());
        for arg in args {
            let arg_path = XPath::parse(&arg.path)?;
            let arg_schema_path = schema.schema_path(&arg_path.step_names());
            if arg_schema_path != allowed_prefix
                && !arg_schema_path.starts_with(&format!("{}/", allowed_prefix))
            {
                return Err(Error::with_xpath(
                    ErrorKind::BadElement,
                    format!("argument is outside the {} subtree", kind.as_str()),
                    arg.path.clone(),
                ));
            }
            edit::apply_set(
                &schema,
                &mut tree,
                &arg_path,
                Some(arg.value.clone()),
                EditOptions::default(),
            )?;
        }

        // the operation node and its direction container exist even
        // without arguments, so their mandatory leaves are checked
        ensure_op_node(&schema, &mut tree, &path)?;
        if let Some(dir) = direction {
            if let Some(op_node) = tree.find_mut(&path)? {
                if !op_node.children.iter().any(|c| c.name == dir) {
                    let kind = if input { NodeKind::Input } else { NodeKind::Output };
                    op_node.children.push(DataNode::interior(dir, kind));
                }
            }
        }

        tree.add_defaults(&schema);

        let selected = tree
            .find(&schema, &path)?
            .ok_or_else(|| Error::internal("operation node vanished from the temporary tree"))?;
        let errors = validate_subtree(selected.node, op_schema, &selected.path);
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }

        // re-read the materialized arguments
        let mut collect_path = path.clone();
        if let Some(dir) = direction {
            collect_path.steps.push(crate::yang::path::Step::named(dir));
        }
        collect_path.descendants = true;
        Ok(tree.collect_items(&schema, &collect_path, false))
    }

    fn check_exists_in_running(&self, session: &mut Session, path: &XPath) -> Result<()> {
        let schema = self.catalog.get(&path.module)?;
        let exists = if session.datastore == Datastore::Running && !session.is_notification() {
            let info = self.data_info(session, &path.module)?;
            info.tree.find(&schema, path)?.is_some()
        } else {
            let mut tree = self.files.load_or_empty(&path.module, Datastore::Running)?.tree;
            tree.add_defaults(&schema);
            tree.find(&schema, path)?.is_some()
        };
        if exists {
            Ok(())
        } else {
            Err(Error::data_missing(path.to_string()))
        }
    }
}

fn ensure_op_node(schema: &SchemaModule, tree: &mut DataTree, path: &XPath) -> Result<()> {
    let mut children: &mut Vec<DataNode> = &mut tree.roots;
    let mut schema_children: &[SchemaNode] = &schema.nodes;
    for step in &path.steps {
        let sn = schema_children
            .iter()
            .find(|s| s.name == step.name)
            .ok_or_else(|| Error::bad_element(format!("unknown element '{}'", step.name)))?;
        let idx = match children.iter().position(|c| c.matches(step)) {
            Some(idx) => idx,
            None => {
                let mut node = DataNode::interior(step.name.clone(), sn.kind);
                if sn.kind == NodeKind::List {
                    for key in &sn.keys {
                        if let (Some(value), Some(key_schema)) = (step.key_value(key), sn.child(key))
                        {
                            if let Some(ty) = &key_schema.leaf_type {
                                node.children
                                    .push(DataNode::leaf(key.clone(), ty.parse_text(value)?));
                            }
                        }
                    }
                }
                children.push(node);
                children.len() - 1
            }
        };
        schema_children = &sn.children;
        children = &mut children[idx].children;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::core::types::{ConnectionMode, Credentials};
    use crate::core::value::Value;
    use crate::datastore::{AccessControl, DataFiles};
    use crate::locks::LockSet;
    use crate::pm::FilePersistence;
    use std::fs;
    use std::sync::Arc;

    fn schema_doc() -> serde_json::Value {
        serde_json::json!({
            "name": "proc",
            "prefix": "p",
            "nodes": [
                {
                    "name": "activate",
                    "kind": "rpc",
                    "children": [
                        { "name": "input", "kind": "input", "children": [
                            { "name": "image", "kind": "leaf", "type": { "base": "string" }, "mandatory": true },
                            { "name": "timeout", "kind": "leaf", "type": { "base": "uint8" }, "default": "30" }
                        ] },
                        { "name": "output", "kind": "output", "children": [
                            { "name": "status", "kind": "leaf", "type": { "base": "string" } }
                        ] }
                    ]
                },
                {
                    "name": "device",
                    "kind": "container",
                    "children": [
                        { "name": "name", "kind": "leaf", "type": { "base": "string" } },
                        { "name": "reset", "kind": "action", "children": [] },
                        { "name": "overheated", "kind": "notification", "children": [
                            { "name": "temperature", "kind": "leaf", "type": { "base": "uint8" } }
                        ] }
                    ]
                }
            ]
        })
    }

    fn dm(dir: &tempfile::TempDir) -> DataManager {
        let schema_dir = dir.path().join("schemas");
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&schema_dir).unwrap();
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(
            schema_dir.join("proc.json"),
            serde_json::to_string(&schema_doc()).unwrap(),
        )
        .unwrap();
        let catalog = Arc::new(SchemaCatalog::new(&schema_dir, ConnectionMode::Local).unwrap());
        DataManager::new(
            catalog,
            DataFiles::new(&data_dir),
            Arc::new(LockSet::new()),
            AccessControl::new(false),
            Arc::new(FilePersistence::new(dir.path().join("persist")).unwrap()),
        )
    }

    #[test]
    fn test_rpc_input_materializes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let dm = dm(&dir);
        let mut session = dm.session_start(Credentials::process(), Datastore::Running);

        let args = vec![Item::new(
            "/proc:activate/input/image",
            Value::String("img-1".into()),
        )];
        let out = dm
            .validate_procedure(&mut session, ProcedureKind::Rpc, "/proc:activate", &args, true)
            .unwrap();

        let paths: Vec<&str> = out.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"/proc:activate/input/image"));
        let timeout = out
            .iter()
            .find(|i| i.path == "/proc:activate/input/timeout")
            .unwrap();
        assert!(timeout.default);
        assert_eq!(timeout.value.canonical(), "30");
    }

    #[test]
    fn test_rpc_missing_mandatory_arg() {
        let dir = tempfile::tempdir().unwrap();
        let dm = dm(&dir);
        let mut session = dm.session_start(Credentials::process(), Datastore::Running);

        let err = dm
            .validate_procedure(&mut session, ProcedureKind::Rpc, "/proc:activate", &[], true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_rpc_output_direction() {
        let dir = tempfile::tempdir().unwrap();
        let dm = dm(&dir);
        let mut session = dm.session_start(Credentials::process(), Datastore::Running);

        let args = vec![Item::new(
            "/proc:activate/output/status",
            Value::String("ok".into()),
        )];
        let out = dm
            .validate_procedure(&mut session, ProcedureKind::Rpc, "/proc:activate", &args, false)
            .unwrap();
        assert_eq!(out.len(), 1);

        // an input arg is rejected in the output direction
        let wrong = vec![Item::new(
            "/proc:activate/input/image",
            Value::String("x".into()),
        )];
        let err = dm
            .validate_procedure(&mut session, ProcedureKind::Rpc, "/proc:activate", &wrong, false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadElement);
    }

    #[test]
    fn test_action_requires_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let dm = dm(&dir);
        let mut session = dm.session_start(Credentials::process(), Datastore::Running);

        let err = dm
            .validate_procedure(
                &mut session,
                ProcedureKind::Action,
                "/proc:device/reset",
                &[],
                true,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataMissing);
    }

    #[test]
    fn test_notification_args_under_node() {
        let dir = tempfile::tempdir().unwrap();
        let dm = dm(&dir);
        let mut session = dm.session_start(Credentials::process(), Datastore::Running);

        // anchor the notification's parent in running
        dm.enable_module_running("proc", false).unwrap();
        dm.set_item(
            &mut session,
            "/proc:device/name",
            Some(Value::String("d1".into())),
            EditOptions::default(),
        )
        .unwrap();

        let args = vec![Item::new(
            "/proc:device/overheated/temperature",
            Value::String("99".into()),
        )];
        let out = dm
            .validate_procedure(
                &mut session,
                ProcedureKind::EventNotification,
                "/proc:device/overheated",
                &args,
                true,
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value.canonical(), "99");
    }
}
