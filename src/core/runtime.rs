//! Core runtime
//!
//! The embedder owns a `CoreRuntime`; every component hangs off it and
//! nothing lives in process globals. Construction wires the schema
//! catalog, data manager, notification processor and request processor
//! together, re-applies persisted feature and enablement state, then
//! spawns the worker pool.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use crate::catalog::SchemaCatalog;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ConnectionMode, Credentials, Datastore};
use crate::core::value::Item;
use crate::datastore::{AccessControl, DataFiles};
use crate::dm::DataManager;
use crate::locks::LockSet;
use crate::np::NotificationProcessor;
use crate::observability::{self, Event};
use crate::pm::{FilePersistence, PersistenceManager};
use crate::rp::{
    InternalBody, Message, Request, RequestBody, RequestProcessor, Response, ResponsePayload,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT,
};

/// Configuration of a runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory of schema documents
    pub schema_search_dir: PathBuf,
    /// Directory of datastore files
    pub data_search_dir: PathBuf,
    /// Daemon loads all modules at startup, local loads lazily
    pub mode: ConnectionMode,
    /// Worker pool size
    pub worker_count: usize,
    /// Request queue capacity
    pub queue_capacity: usize,
    /// Enforce per-caller file access checks
    pub access_checks: bool,
}

impl RuntimeConfig {
    pub fn new(schema_search_dir: impl Into<PathBuf>, data_search_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_search_dir: schema_search_dir.into(),
            data_search_dir: data_search_dir.into(),
            mode: ConnectionMode::Local,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            access_checks: false,
        }
    }

    pub fn daemon(mut self) -> Self {
        self.mode = ConnectionMode::Daemon;
        self.access_checks = true;
        self
    }
}

/// The runtime owning every component.
pub struct CoreRuntime {
    pub catalog: Arc<SchemaCatalog>,
    pub dm: DataManager,
    pub np: NotificationProcessor,
    pub rp: RequestProcessor,
    pub pm: Arc<dyn PersistenceManager>,
    config: RuntimeConfig,
}

impl CoreRuntime {
    /// Build and start a runtime: components wired, persisted state
    /// re-applied, workers running.
    pub fn start(config: RuntimeConfig) -> Result<Arc<Self>> {
        observability::info(Event::InitStart, &[("mode", mode_str(config.mode))]);
        let runtime = Arc::new(Self::build(config)?);
        runtime.rp.start_workers(Arc::clone(&runtime))?;
        observability::info(Event::InitComplete, &[]);
        Ok(runtime)
    }

    fn build(config: RuntimeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_search_dir).map_err(|e| {
            Error::new(
                ErrorKind::InitFailed,
                format!("cannot create data directory: {}", e),
            )
        })?;

        let pm: Arc<dyn PersistenceManager> = Arc::new(FilePersistence::new(
            config.data_search_dir.join("persist"),
        )?);
        let catalog = Arc::new(SchemaCatalog::new(&config.schema_search_dir, config.mode)?);
        let locks = Arc::new(LockSet::new());
        let access = AccessControl::new(config.access_checks);
        let files = DataFiles::new(&config.data_search_dir);
        let dm = DataManager::new(
            Arc::clone(&catalog),
            files,
            locks,
            access,
            Arc::clone(&pm),
        );
        let np = NotificationProcessor::new(Arc::clone(&pm));
        let rp = RequestProcessor::new(config.worker_count, config.queue_capacity);

        let runtime = Self {
            catalog,
            dm,
            np,
            rp,
            pm,
            config,
        };
        runtime.apply_persisted_state()?;
        Ok(runtime)
    }

    /// Re-apply features and running enablement persisted by earlier
    /// runs; called after schema load.
    fn apply_persisted_state(&self) -> Result<()> {
        for module in self.catalog.loaded_modules() {
            for feature in self.pm.module_features(&module)? {
                // unknown features in stale records are skipped
                let _ = self.catalog.set_feature(&module, &feature, true);
            }
            if self.pm.module_enabled_running(&module)? {
                self.dm.enable_module_running(&module, false)?;
            }
            for subtree in self.pm.enabled_subtrees(&module)? {
                let _ = self.dm.enable_module_subtree_running(&module, &subtree);
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Enqueue a request and wait for its response.
    pub fn execute(&self, session_id: u32, body: RequestBody) -> Response {
        let (tx, rx) = mpsc::channel();
        let request = Request {
            session_id,
            request_id: self.rp.next_request_id(),
            body,
            reply: Some(tx),
        };
        if let Err(e) = self.rp.queue().enqueue(Message::Request(request)) {
            return Response::from_error(e);
        }
        rx.recv().unwrap_or_else(|_| {
            Response::from_error(Error::new(
                ErrorKind::Disconnect,
                "request processor went away",
            ))
        })
    }

    /// Start a user session and return its id.
    pub fn session_start(&self, credentials: Credentials, datastore: Datastore) -> Result<u32> {
        match self.execute(
            0,
            RequestBody::SessionStart {
                credentials,
                datastore,
                commit_id: None,
            },
        ) {
            Response {
                errors,
                payload: ResponsePayload::SessionId(id),
            } if errors.is_empty() => Ok(id),
            response => Err(first_error(response)),
        }
    }

    /// Start a notification session bound to a commit id.
    pub fn notification_session_start(
        &self,
        credentials: Credentials,
        commit_id: u32,
    ) -> Result<u32> {
        match self.execute(
            0,
            RequestBody::SessionStart {
                credentials,
                datastore: Datastore::Running,
                commit_id: Some(commit_id),
            },
        ) {
            Response {
                errors,
                payload: ResponsePayload::SessionId(id),
            } if errors.is_empty() => Ok(id),
            response => Err(first_error(response)),
        }
    }

    /// Stop a session.
    pub fn session_stop(&self, session_id: u32) -> Result<()> {
        let response = self.execute(session_id, RequestBody::SessionStop);
        if response.is_ok() {
            Ok(())
        } else {
            Err(first_error(response))
        }
    }

    /// Deliver a provider's operational data for a suspended read.
    pub fn provide_data(&self, session_id: u32, request_id: u64, items: Vec<Item>) -> Result<()> {
        self.rp
            .queue()
            .enqueue(Message::Internal(InternalBody::DataProvideResp {
                session_id,
                request_id,
                items,
            }))
    }

    /// Acknowledge an apply notification.
    pub fn ack_commit(&self, commit_id: u32, subscription_id: u32) -> Result<()> {
        self.dm.ack_commit(commit_id, subscription_id)
    }

    /// Drop every subscription of a disconnected destination.
    pub fn destination_gone(&self, destination: impl Into<String>) -> Result<()> {
        self.rp
            .queue()
            .enqueue(Message::Internal(InternalBody::UnsubscribeDestination {
                destination: destination.into(),
            }))
    }

    /// Stop the worker pool. Must be called by the embedder; workers
    /// hold a reference to the runtime while running.
    pub fn shutdown(&self) {
        observability::info(Event::ShutdownStart, &[]);
        self.rp.shutdown();
        observability::info(Event::ShutdownComplete, &[]);
    }
}

fn mode_str(mode: ConnectionMode) -> &'static str {
    match mode {
        ConnectionMode::Daemon => "daemon",
        ConnectionMode::Local => "local",
    }
}

fn first_error(response: Response) -> Error {
    response
        .errors
        .into_iter()
        .next()
        .unwrap_or_else(|| Error::internal("unexpected response payload"))
}
