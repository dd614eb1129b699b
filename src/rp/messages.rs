//! Request and response taxonomy
//!
//! Wire framing is an external collaborator; these are the in-process
//! shapes the dispatcher consumes. Every request carries its session id
//! and a reply slot; internal messages are self-addressed by the request
//! processor (timeouts, provider responses, commit release).

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{Credentials, Datastore, SessionOptions};
use crate::core::value::{Item, Value};
use crate::dm::commit_context::ChangeRecord;
use crate::dm::session::EditOptions;
use crate::np::SubscribeSpec;
use crate::yang::tree::MovePosition;

/// Schema metadata returned by `list_schemas`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub prefix: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
    #[serde(default)]
    pub submodules: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl From<crate::catalog::ModuleInfo> for SchemaInfo {
    fn from(info: crate::catalog::ModuleInfo) -> Self {
        Self {
            name: info.name,
            revision: info.revision,
            prefix: info.prefix,
            enabled_features: info.enabled_features,
            submodules: info.submodules.into_iter().map(|s| s.name).collect(),
            disabled: info.disabled,
        }
    }
}

/// Request bodies, one per operation of the public surface.
pub enum RequestBody {
    SessionStart {
        credentials: Credentials,
        datastore: Datastore,
        /// Binds a notification session to a live commit
        commit_id: Option<u32>,
    },
    SessionStop,
    SessionRefresh,
    SessionSwitchDs {
        datastore: Datastore,
    },
    SessionSetOpts {
        options: SessionOptions,
    },
    ListSchemas,
    GetSchema {
        module: String,
        revision: Option<String>,
    },
    ModuleInstall {
        module: String,
        revision: Option<String>,
        installed: bool,
    },
    FeatureEnable {
        module: String,
        feature: String,
        enabled: bool,
    },
    GetItem {
        path: String,
    },
    GetItems {
        path: String,
        offset: Option<usize>,
        limit: Option<usize>,
    },
    SetItem {
        path: String,
        value: Option<Value>,
        options: EditOptions,
    },
    DeleteItem {
        path: String,
        options: EditOptions,
    },
    MoveItem {
        path: String,
        position: MovePosition,
        relative: Option<String>,
    },
    Validate,
    Commit,
    DiscardChanges,
    CopyConfig {
        module: Option<String>,
        src: Datastore,
        dst: Datastore,
    },
    Lock {
        /// `None` locks the whole datastore
        module: Option<String>,
    },
    Unlock {
        module: Option<String>,
    },
    Subscribe {
        spec: SubscribeSpec,
    },
    Unsubscribe {
        destination: String,
        id: Option<u32>,
    },
    CheckEnabledRunning {
        module: String,
        xpath: Option<String>,
    },
    GetChanges {
        xpath: String,
        offset: usize,
        limit: usize,
    },
    Rpc {
        xpath: String,
        args: Vec<Item>,
    },
    Action {
        xpath: String,
        args: Vec<Item>,
    },
    EventNotif {
        xpath: String,
        args: Vec<Item>,
    },
}

impl RequestBody {
    /// Operation name for logs and rejections.
    pub fn name(&self) -> &'static str {
        match self {
            RequestBody::SessionStart { .. } => "session_start",
            RequestBody::SessionStop => "session_stop",
            RequestBody::SessionRefresh => "session_refresh",
            RequestBody::SessionSwitchDs { .. } => "session_switch_ds",
            RequestBody::SessionSetOpts { .. } => "session_set_opts",
            RequestBody::ListSchemas => "list_schemas",
            RequestBody::GetSchema { .. } => "get_schema",
            RequestBody::ModuleInstall { .. } => "module_install",
            RequestBody::FeatureEnable { .. } => "feature_enable",
            RequestBody::GetItem { .. } => "get_item",
            RequestBody::GetItems { .. } => "get_items",
            RequestBody::SetItem { .. } => "set_item",
            RequestBody::DeleteItem { .. } => "delete_item",
            RequestBody::MoveItem { .. } => "move_item",
            RequestBody::Validate => "validate",
            RequestBody::Commit => "commit",
            RequestBody::DiscardChanges => "discard_changes",
            RequestBody::CopyConfig { .. } => "copy_config",
            RequestBody::Lock { .. } => "lock",
            RequestBody::Unlock { .. } => "unlock",
            RequestBody::Subscribe { .. } => "subscribe",
            RequestBody::Unsubscribe { .. } => "unsubscribe",
            RequestBody::CheckEnabledRunning { .. } => "check_enabled_running",
            RequestBody::GetChanges { .. } => "get_changes",
            RequestBody::Rpc { .. } => "rpc",
            RequestBody::Action { .. } => "action",
            RequestBody::EventNotif { .. } => "event_notif",
        }
    }

    /// Operations a notification session may issue.
    pub fn allowed_on_notification_session(&self) -> bool {
        matches!(
            self,
            RequestBody::GetItem { .. }
                | RequestBody::GetItems { .. }
                | RequestBody::SessionRefresh
                | RequestBody::GetChanges { .. }
                | RequestBody::Unsubscribe { .. }
                | RequestBody::SessionStop
        )
    }

    /// True for the commit operation, which takes the exclusive latch.
    pub fn is_commit(&self) -> bool {
        matches!(self, RequestBody::Commit)
    }
}

/// A request bound for dispatch.
pub struct Request {
    /// Session the request belongs to; 0 for `session_start`
    pub session_id: u32,
    /// Monotonic identity assigned at enqueue time; operational-data
    /// timeouts and provider responses are matched against it
    pub request_id: u64,
    pub body: RequestBody,
    /// Reply slot; absent for fire-and-forget callers
    pub reply: Option<Sender<Response>>,
}

/// Self-addressed messages of the request processor.
pub enum InternalBody {
    /// A destination disconnected; drop its subscriptions
    UnsubscribeDestination { destination: String },
    /// Release timer of a commit context fired
    CommitRelease { commit_id: u32 },
    /// Operational-data wait expired
    OperDataTimeout { session_id: u32, request_id: u64 },
    /// A provider answered an operational-data request
    DataProvideResp {
        session_id: u32,
        request_id: u64,
        items: Vec<Item>,
    },
}

/// Everything the queue can carry.
pub enum Message {
    Request(Request),
    Internal(InternalBody),
}

/// Operation-specific response payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    None,
    SessionId(u32),
    Schemas(Vec<SchemaInfo>),
    SchemaText(String),
    Item(Item),
    Items(Vec<Item>),
    Changes(Vec<ChangeRecord>),
    CommitId(Option<u32>),
    Enabled(bool),
    Output(Vec<Item>),
    UpToDate(Vec<String>),
    SubscriptionId(u32),
}

/// A response: result errors (empty on success) plus the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub errors: Vec<Error>,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn ok(payload: ResponsePayload) -> Self {
        Self {
            errors: Vec::new(),
            payload,
        }
    }

    pub fn from_error(error: Error) -> Self {
        Self {
            errors: vec![error],
            payload: ResponsePayload::None,
        }
    }

    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            errors,
            payload: ResponsePayload::None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The first error, if any.
    pub fn first_error(&self) -> Option<&Error> {
        self.errors.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_whitelist() {
        assert!(RequestBody::GetItem { path: "/m:x".into() }.allowed_on_notification_session());
        assert!(RequestBody::SessionRefresh.allowed_on_notification_session());
        assert!(RequestBody::GetChanges {
            xpath: "/m:x".into(),
            offset: 0,
            limit: 10
        }
        .allowed_on_notification_session());
        assert!(!RequestBody::Commit.allowed_on_notification_session());
        assert!(!RequestBody::SetItem {
            path: "/m:x".into(),
            value: None,
            options: EditOptions::default()
        }
        .allowed_on_notification_session());
    }

    #[test]
    fn test_response_helpers() {
        let ok = Response::ok(ResponsePayload::SessionId(1));
        assert!(ok.is_ok());
        let err = Response::from_error(Error::not_found("x"));
        assert!(!err.is_ok());
        assert!(err.first_error().is_some());
    }
}
