//! Request processor
//!
//! A bounded queue feeding a fixed pool of worker threads. Dispatch is
//! sequential within a thread; all suspension is explicit via
//! re-enqueue. Read and edit requests hold a shared commit latch,
//! commit takes it exclusive, so commits serialize against everything
//! without blocking read-vs-read.

pub mod dispatch;
pub mod get;
pub mod messages;
pub mod queue;
pub mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::runtime::CoreRuntime;

pub use messages::{
    InternalBody, Message, Request, RequestBody, Response, ResponsePayload, SchemaInfo,
};
pub use queue::RequestQueue;
pub use session::{RequestState, RpSession};

/// Operational-data wait deadline.
pub const OPER_DATA_TIMEOUT: Duration = Duration::from_secs(2);
/// Bound on commit-context lifetime when an apply subscriber never acks.
pub const COMMIT_RELEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default worker pool size.
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// Default request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// The request processor.
pub struct RequestProcessor {
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) sessions: RwLock<HashMap<u32, Arc<RpSession>>>,
    pub(crate) commit_latch: RwLock<()>,
    next_request_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl RequestProcessor {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            queue: Arc::new(RequestQueue::new(queue_capacity)),
            sessions: RwLock::new(HashMap::new()),
            commit_latch: RwLock::new(()),
            next_request_id: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
            worker_count,
        }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Identity assigned to every enqueued request; timeouts and
    /// provider responses are matched against it, never against
    /// addresses.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn the worker pool.
    pub fn start_workers(&self, runtime: Arc<CoreRuntime>) -> crate::core::error::Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for index in 0..self.worker_count {
            let runtime = Arc::clone(&runtime);
            let handle = std::thread::Builder::new()
                .name(format!("rp-worker-{}", index))
                .spawn(move || {
                    while let Some(message) = runtime.rp.queue.dequeue() {
                        dispatch::process(&runtime, message);
                    }
                })
                .map_err(|e| {
                    crate::core::error::Error::new(
                        crate::core::error::ErrorKind::InitFailed,
                        format!("cannot spawn worker thread: {}", e),
                    )
                })?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Close the queue and join every worker.
    pub fn shutdown(&self) {
        self.queue.close();
        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    pub(crate) fn session(&self, id: u32) -> Option<Arc<RpSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&id)
            .cloned()
    }

    pub(crate) fn insert_session(&self, session: Arc<RpSession>) {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(session.id, session);
    }

    pub(crate) fn remove_session(&self, id: u32) -> Option<Arc<RpSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id)
    }

    /// Arm a one-shot timer that enqueues an internal message.
    pub(crate) fn arm_timer(queue: Arc<RequestQueue>, delay: Duration, body: InternalBody) {
        std::thread::Builder::new()
            .name("rp-timer".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                let _ = queue.enqueue(Message::Internal(body));
            })
            .ok();
    }
}
