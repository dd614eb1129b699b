//! Notification processor
//!
//! In-memory subscription registry keyed by kind and module, the
//! verify/apply fan-out of the commit pipeline and the data-provider
//! requests of operational reads. Subscriptions are tagged enums over
//! closures: each variant accepts exactly the event shape its kind can
//! receive. Verify notifications are delivered in strict descending
//! priority and any negative acknowledgement aborts the commit; apply
//! notifications follow the same order but never block the committer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Datastore;
use crate::core::value::Item;
use crate::observability::{self, Event};
use crate::pm::{PersistenceManager, SubscriptionRecord};
use crate::yang::diff::{DiffEntry, DiffOp};
use crate::yang::path::XPath;
use crate::yang::schema::SchemaModule;
use crate::yang::tree::DataTree;

/// Subscription kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    ModuleChange,
    SubtreeChange,
    ModuleInstall,
    FeatureEnable,
    Rpc,
    Action,
    OperationalDataProvider,
    EventNotification,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::ModuleChange => "module-change",
            SubscriptionKind::SubtreeChange => "subtree-change",
            SubscriptionKind::ModuleInstall => "module-install",
            SubscriptionKind::FeatureEnable => "feature-enable",
            SubscriptionKind::Rpc => "rpc",
            SubscriptionKind::Action => "action",
            SubscriptionKind::OperationalDataProvider => "operational-data-provider",
            SubscriptionKind::EventNotification => "event-notification",
        }
    }

    /// Only one live subscription may exist per rpc or action path.
    pub fn is_exclusive(&self) -> bool {
        matches!(self, SubscriptionKind::Rpc | SubscriptionKind::Action)
    }
}

/// Which commit events a change subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub verify: bool,
    pub apply: bool,
}

impl EventFilter {
    pub fn apply_only() -> Self {
        Self {
            verify: false,
            apply: true,
        }
    }

    pub fn verify_and_apply() -> Self {
        Self {
            verify: true,
            apply: true,
        }
    }
}

/// Option bits carried by a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscrOptions {
    /// Count the module as enabled in running while subscribed
    pub enable_running: bool,
    /// Reuse the subscriber's context between events
    pub ctx_reuse: bool,
    /// Never consulted during verify
    pub passive: bool,
    /// Acknowledge apply events explicitly via `ack`
    pub manual_ack: bool,
}

/// The commit event variant delivered to change subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Verify,
    Apply,
}

/// Payload of a commit notification.
#[derive(Debug, Clone)]
pub struct CommitNotification {
    pub commit_id: u32,
    pub module: String,
    pub datastore: Datastore,
    pub event: ChangeEvent,
    pub subscription_id: u32,
}

/// Payload of an operational-data request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub xpath: String,
    pub session_id: u32,
    pub request_id: u64,
    pub subscription_id: u32,
}

pub type ChangeHandler = Arc<dyn Fn(&CommitNotification) -> Result<()> + Send + Sync>;
pub type ModuleInstallHandler = Arc<dyn Fn(&str, Option<&str>, bool) + Send + Sync>;
pub type FeatureEnableHandler = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;
pub type ProcedureHandler = Arc<dyn Fn(&str, &[Item]) -> Result<Vec<Item>> + Send + Sync>;
pub type ProviderHandler = Arc<dyn Fn(&ProviderRequest) + Send + Sync>;
pub type EventNotifHandler = Arc<dyn Fn(&str, &[Item]) + Send + Sync>;

/// Per-kind event closure of a subscription.
#[derive(Clone)]
pub enum SubscriptionHandler {
    /// module-change and subtree-change
    Change(ChangeHandler),
    /// module-install
    ModuleInstall(ModuleInstallHandler),
    /// feature-enable
    FeatureEnable(FeatureEnableHandler),
    /// rpc and action
    Procedure(ProcedureHandler),
    /// operational-data-provider
    DataProvider(ProviderHandler),
    /// event-notification
    EventNotification(EventNotifHandler),
}

impl std::fmt::Debug for SubscriptionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscriptionHandler::Change(_) => "Change",
            SubscriptionHandler::ModuleInstall(_) => "ModuleInstall",
            SubscriptionHandler::FeatureEnable(_) => "FeatureEnable",
            SubscriptionHandler::Procedure(_) => "Procedure",
            SubscriptionHandler::DataProvider(_) => "DataProvider",
            SubscriptionHandler::EventNotification(_) => "EventNotification",
        };
        write!(f, "SubscriptionHandler::{}", name)
    }
}

/// A registered subscription. The registry owns the canonical copy;
/// commit contexts clone per-commit views.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: u32,
    pub kind: SubscriptionKind,
    pub module: String,
    pub xpath: Option<String>,
    pub destination: String,
    pub priority: u32,
    pub options: SubscrOptions,
    pub events: EventFilter,
    pub handler: SubscriptionHandler,
}

/// Parameters of `subscribe`.
pub struct SubscribeSpec {
    pub kind: SubscriptionKind,
    pub module: String,
    pub xpath: Option<String>,
    pub destination: String,
    pub priority: u32,
    pub options: SubscrOptions,
    pub events: EventFilter,
    pub handler: SubscriptionHandler,
}

/// The notification processor.
pub struct NotificationProcessor {
    registry: RwLock<Vec<Subscription>>,
    next_id: AtomicU32,
    pm: Arc<dyn PersistenceManager>,
}

impl NotificationProcessor {
    pub fn new(pm: Arc<dyn PersistenceManager>) -> Self {
        Self {
            registry: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
            pm,
        }
    }

    fn registry_read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscription>> {
        self.registry.read().unwrap_or_else(|p| p.into_inner())
    }

    fn registry_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscription>> {
        self.registry.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a subscription. Exclusivity is enforced for rpc and
    /// action kinds: a second subscription on the same path is rejected.
    pub fn subscribe(&self, spec: SubscribeSpec) -> Result<u32> {
        let mut registry = self.registry_write();
        if spec.kind.is_exclusive() {
            let clash = registry
                .iter()
                .any(|s| s.kind == spec.kind && s.module == spec.module && s.xpath == spec.xpath);
            if clash {
                return Err(Error::new(
                    ErrorKind::DataExists,
                    format!(
                        "a {} subscription for this path already exists",
                        spec.kind.as_str()
                    ),
                ));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = Subscription {
            id,
            kind: spec.kind,
            module: spec.module,
            xpath: spec.xpath,
            destination: spec.destination,
            priority: spec.priority,
            options: spec.options,
            events: spec.events,
            handler: spec.handler,
        };
        let record = SubscriptionRecord {
            module: subscription.module.clone(),
            kind: subscription.kind.as_str().to_string(),
            xpath: subscription.xpath.clone(),
            destination: subscription.destination.clone(),
            id,
            priority: subscription.priority,
            enable_running: subscription.options.enable_running,
        };
        self.pm.persist_subscription(&record)?;
        observability::info(
            Event::Subscribed,
            &[
                ("module", &subscription.module),
                ("kind", subscription.kind.as_str()),
                ("destination", &subscription.destination),
            ],
        );
        registry.push(subscription);
        Ok(id)
    }

    /// Remove one subscription of a destination, or all of them when
    /// `id` is `None`.
    pub fn unsubscribe(&self, destination: &str, id: Option<u32>) -> Result<()> {
        let mut registry = self.registry_write();
        let before = registry.len();
        let mut removed: Vec<(String, u32)> = Vec::new();
        registry.retain(|s| {
            let matches = s.destination == destination && id.map(|i| i == s.id).unwrap_or(true);
            if matches {
                removed.push((s.module.clone(), s.id));
            }
            !matches
        });
        if registry.len() == before {
            return Err(Error::not_found(format!(
                "no matching subscription for '{}'",
                destination
            )));
        }
        for (module, id) in removed {
            self.pm.remove_subscription(&module, id)?;
            observability::info(Event::Unsubscribed, &[("destination", destination)]);
        }
        Ok(())
    }

    /// Drop every subscription of a disconnected destination.
    pub fn unsubscribe_destination(&self, destination: &str) {
        let _ = self.unsubscribe(destination, None);
    }

    /// Change subscriptions of a module, sorted by descending priority.
    /// Commit contexts snapshot this at prepare time.
    pub fn change_subscriptions(&self, module: &str) -> Vec<Subscription> {
        let registry = self.registry_read();
        let mut subs: Vec<Subscription> = registry
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SubscriptionKind::ModuleChange | SubscriptionKind::SubtreeChange
                ) && s.module == module
            })
            .cloned()
            .collect();
        subs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        subs
    }

    /// Operational-data providers whose subtree intersects `path`.
    pub fn providers_for(&self, module: &str, path: &XPath) -> Vec<Subscription> {
        let registry = self.registry_read();
        let request_schema = path.schema_path();
        registry
            .iter()
            .filter(|s| s.kind == SubscriptionKind::OperationalDataProvider && s.module == module)
            .filter(|s| match &s.xpath {
                Some(sub_path) => {
                    schema_path_within(sub_path, &request_schema)
                        || schema_path_within(&request_schema, sub_path)
                }
                None => true,
            })
            .cloned()
            .collect()
    }

    /// The unique rpc/action subscription of a schema path.
    pub fn procedure_subscription(
        &self,
        kind: SubscriptionKind,
        module: &str,
        schema_path: &str,
    ) -> Option<Subscription> {
        let registry = self.registry_read();
        registry
            .iter()
            .find(|s| {
                s.kind == kind && s.module == module && s.xpath.as_deref() == Some(schema_path)
            })
            .cloned()
    }

    /// Event-notification subscriptions matching a schema path.
    pub fn event_subscriptions(&self, module: &str, schema_path: &str) -> Vec<Subscription> {
        let registry = self.registry_read();
        registry
            .iter()
            .filter(|s| s.kind == SubscriptionKind::EventNotification && s.module == module)
            .filter(|s| match &s.xpath {
                Some(sub_path) => schema_path_within(sub_path, schema_path),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Whether any subscription currently enables `module` in running.
    pub fn enables_running(&self, module: &str) -> bool {
        let registry = self.registry_read();
        registry
            .iter()
            .any(|s| s.module == module && s.options.enable_running)
    }

    /// Notify module-install subscribers.
    pub fn notify_module_install(&self, module: &str, revision: Option<&str>, installed: bool) {
        let subs: Vec<Subscription> = {
            let registry = self.registry_read();
            registry
                .iter()
                .filter(|s| s.kind == SubscriptionKind::ModuleInstall)
                .cloned()
                .collect()
        };
        for sub in subs {
            if let SubscriptionHandler::ModuleInstall(handler) = &sub.handler {
                handler(module, revision, installed);
            }
        }
    }

    /// Notify feature-enable subscribers.
    pub fn notify_feature_enable(&self, module: &str, feature: &str, enabled: bool) {
        let subs: Vec<Subscription> = {
            let registry = self.registry_read();
            registry
                .iter()
                .filter(|s| s.kind == SubscriptionKind::FeatureEnable && s.module == module)
                .cloned()
                .collect()
        };
        for sub in subs {
            if let SubscriptionHandler::FeatureEnable(handler) = &sub.handler {
                handler(module, feature, enabled);
            }
        }
    }

    /// Send an operational-data request to one provider.
    pub fn notify_data_provider_request(&self, subscription: &Subscription, request: &ProviderRequest) {
        if let SubscriptionHandler::DataProvider(handler) = &subscription.handler {
            handler(request);
        }
    }
}

/// True when `inner` equals `outer` or is a descendant schema path of it.
pub fn schema_path_within(outer: &str, inner: &str) -> bool {
    inner == outer || inner.starts_with(&format!("{}/", outer))
}

/// Whether a diff entry targets a subscription.
///
/// A hit is reported when the entry's node is the subscribed node or a
/// descendant of it; additionally, when the entry creates or deletes a
/// subtree that contains the subscribed node, the subtree is walked and
/// a hit is reported iff the subscribed node exists in it.
pub fn subscription_matches(
    subscription: &Subscription,
    entry: &DiffEntry,
    schema: &SchemaModule,
    pre: &DataTree,
    post: &DataTree,
) -> bool {
    let sub_path = match (&subscription.kind, &subscription.xpath) {
        (SubscriptionKind::ModuleChange, _) => return true,
        (_, Some(path)) => path.as_str(),
        (_, None) => return true,
    };
    let entry_schema = strip_predicates(&entry.path);

    if schema_path_within(sub_path, &entry_schema) {
        return true;
    }

    // creation/deletion of an ancestor subtree: walk it for the node
    if schema_path_within(&entry_schema, sub_path) {
        let tree = match entry.op {
            DiffOp::Created => post,
            DiffOp::Deleted => pre,
            _ => return false,
        };
        if let Ok(parsed) = XPath::parse(sub_path) {
            return !tree.select(schema, &parsed).is_empty();
        }
    }
    false
}

/// Strip `[...]` predicates from an instance identifier.
pub fn strip_predicates(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut depth = 0usize;
    for c in path.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::FilePersistence;

    fn np(dir: &tempfile::TempDir) -> NotificationProcessor {
        NotificationProcessor::new(Arc::new(
            FilePersistence::new(dir.path().join("persist")).unwrap(),
        ))
    }

    fn change_spec(module: &str, priority: u32) -> SubscribeSpec {
        SubscribeSpec {
            kind: SubscriptionKind::ModuleChange,
            module: module.into(),
            xpath: None,
            destination: format!("dest-{}", priority),
            priority,
            options: SubscrOptions::default(),
            events: EventFilter::verify_and_apply(),
            handler: SubscriptionHandler::Change(Arc::new(|_| Ok(()))),
        }
    }

    #[test]
    fn test_subscribe_and_snapshot_order() {
        let dir = tempfile::tempdir().unwrap();
        let np = np(&dir);
        np.subscribe(change_spec("m", 5)).unwrap();
        np.subscribe(change_spec("m", 20)).unwrap();
        np.subscribe(change_spec("m", 10)).unwrap();
        np.subscribe(change_spec("other", 99)).unwrap();

        let subs = np.change_subscriptions("m");
        let priorities: Vec<u32> = subs.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![20, 10, 5]);
    }

    #[test]
    fn test_unsubscribe_by_id_and_all() {
        let dir = tempfile::tempdir().unwrap();
        let np = np(&dir);
        let mut spec = change_spec("m", 1);
        spec.destination = "d".into();
        let id1 = np.subscribe(spec).unwrap();
        let mut spec = change_spec("m", 2);
        spec.destination = "d".into();
        np.subscribe(spec).unwrap();

        np.unsubscribe("d", Some(id1)).unwrap();
        assert_eq!(np.change_subscriptions("m").len(), 1);

        np.unsubscribe_destination("d");
        assert!(np.change_subscriptions("m").is_empty());

        assert!(np.unsubscribe("d", None).is_err());
    }

    #[test]
    fn test_rpc_exclusivity() {
        let dir = tempfile::tempdir().unwrap();
        let np = np(&dir);
        let spec = || SubscribeSpec {
            kind: SubscriptionKind::Rpc,
            module: "m".into(),
            xpath: Some("/m:do-thing".into()),
            destination: "d".into(),
            priority: 0,
            options: SubscrOptions::default(),
            events: EventFilter::apply_only(),
            handler: SubscriptionHandler::Procedure(Arc::new(|_, _| Ok(vec![]))),
        };
        np.subscribe(spec()).unwrap();
        let err = np.subscribe(spec()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataExists);
    }

    #[test]
    fn test_enables_running() {
        let dir = tempfile::tempdir().unwrap();
        let np = np(&dir);
        assert!(!np.enables_running("m"));
        let mut spec = change_spec("m", 1);
        spec.options.enable_running = true;
        np.subscribe(spec).unwrap();
        assert!(np.enables_running("m"));
    }

    #[test]
    fn test_strip_predicates() {
        assert_eq!(
            strip_predicates("/m:c/list[key1='a'][key2='b']/leaf"),
            "/m:c/list/leaf"
        );
        assert_eq!(strip_predicates("/m:c/numbers[.='x/y']"), "/m:c/numbers");
    }

    #[test]
    fn test_schema_path_within() {
        assert!(schema_path_within("/m:c", "/m:c"));
        assert!(schema_path_within("/m:c", "/m:c/leaf"));
        assert!(!schema_path_within("/m:c", "/m:cc"));
        assert!(!schema_path_within("/m:c/leaf", "/m:c"));
    }
}
