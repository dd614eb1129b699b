//! Per-session request state
//!
//! Worker threads and provider responses meet on the session: the state
//! machine below serializes them. A read that needs operational data
//! parks its request in the session and transitions to
//! `WaitingForData`; provider responses and the wait timeout race to
//! move it to `DataLoaded`, at which point the request is re-enqueued
//! and served from the already populated tree.
//!
//! ```text
//! NEW -> READING -> WAITING_FOR_DATA -> DATA_LOADED -> (resume) -> FINISHED
//!              \________________________________________________/
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use crate::dm::session::Session as DmSession;

use super::messages::Request;

/// Request-processing state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    New,
    Reading,
    WaitingForData,
    DataLoaded,
    Finished,
}

/// A read request parked while operational data is gathered.
pub struct PendingRead {
    /// The parked request, re-enqueued on resume
    pub request: Request,
    /// Identity guarding against stale timeouts and responses
    pub request_id: u64,
    /// Providers that have not answered yet
    pub outstanding: usize,
}

/// Mutable request state of one session.
pub struct SessionState {
    pub state: RequestState,
    pub pending: Option<PendingRead>,
}

struct MessageCount {
    inflight: u32,
    stop_requested: bool,
}

/// A session as the request processor sees it.
pub struct RpSession {
    pub id: u32,
    dm: Mutex<DmSession>,
    state: Mutex<SessionState>,
    messages: Mutex<MessageCount>,
}

impl RpSession {
    pub fn new(dm_session: DmSession) -> Arc<Self> {
        Arc::new(Self {
            id: dm_session.id,
            dm: Mutex::new(dm_session),
            state: Mutex::new(SessionState {
                state: RequestState::New,
                pending: None,
            }),
            messages: Mutex::new(MessageCount {
                inflight: 0,
                stop_requested: false,
            }),
        })
    }

    /// The data-manager session; holding the guard serializes request
    /// processing on this session.
    pub fn dm(&self) -> MutexGuard<'_, DmSession> {
        self.dm.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The request state machine.
    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Count one inflight message.
    pub fn message_arrived(&self) {
        let mut messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
        messages.inflight += 1;
    }

    /// Finish one inflight message. Returns true when a requested stop
    /// must now be carried out by the caller.
    pub fn message_done(&self) -> bool {
        let mut messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
        messages.inflight = messages.inflight.saturating_sub(1);
        messages.stop_requested && messages.inflight == 0
    }

    /// Request a stop. Returns true when the teardown can run right
    /// away; otherwise the last inflight message performs it.
    pub fn request_stop(&self) -> bool {
        let mut messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
        if messages.inflight <= 1 {
            true
        } else {
            messages.stop_requested = true;
            false
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .stop_requested
    }
}

impl SessionState {
    /// Park a request while providers are consulted.
    pub fn park(&mut self, request: Request, request_id: u64, outstanding: usize) {
        self.state = RequestState::WaitingForData;
        self.pending = Some(PendingRead {
            request,
            request_id,
            outstanding,
        });
    }

    /// Handle one provider response. Returns the parked request when
    /// everything arrived and the read must resume.
    pub fn provider_answered(&mut self, request_id: u64) -> Option<Request> {
        if self.state != RequestState::WaitingForData {
            return None;
        }
        let pending = self.pending.as_mut()?;
        if pending.request_id != request_id {
            return None;
        }
        pending.outstanding = pending.outstanding.saturating_sub(1);
        if pending.outstanding == 0 {
            self.state = RequestState::DataLoaded;
            return self.pending.take().map(|p| p.request);
        }
        None
    }

    /// Handle the wait timeout. Returns the parked request when its
    /// identity still matches; the read resumes with partial data.
    pub fn wait_expired(&mut self, request_id: u64) -> Option<Request> {
        if self.state != RequestState::WaitingForData {
            return None;
        }
        match &self.pending {
            Some(pending) if pending.request_id == request_id => {
                self.state = RequestState::DataLoaded;
                self.pending.take().map(|p| p.request)
            }
            _ => None,
        }
    }

    /// Reset after a served request.
    pub fn finish(&mut self) {
        self.state = RequestState::New;
        self.pending = None;
    }
}
