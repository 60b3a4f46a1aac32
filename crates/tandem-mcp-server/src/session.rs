//! Session registry for the SSE server.
//!
//! A session exists for as long as its event stream is open. Frames for a
//! session go through a bounded channel drained by the stream body.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{McpServerError, Result};

/// One connected event-stream client
#[derive(Debug)]
pub struct Session {
    id: String,
    frames: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    created_at: Instant,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Fires once the session is closed, whichever side closed it.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queue one pre-formatted SSE frame for the stream.
    pub(crate) async fn send_frame(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(McpServerError::SessionClosed(self.id.clone()));
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(McpServerError::SessionClosed(self.id.clone())),
            sent = self.frames.send(frame) => {
                sent.map_err(|_| McpServerError::SessionClosed(self.id.clone()))
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Live sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with a fresh id. The receiver yields its frames.
    pub fn create(&self, buffer: usize) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (frames, receiver) = mpsc::channel(buffer.max(1));
        let session = Arc::new(Session {
            id: Uuid::now_v7().to_string(),
            frames,
            closed: CancellationToken::new(),
            created_at: Instant::now(),
        });
        self.sessions
            .lock()
            .insert(session.id.clone(), Arc::clone(&session));
        debug!(session_id = %session.id, "Session registered");
        (session, receiver)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Deregister and close. Safe to call for an id that is already gone.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.lock().remove(id);
        if let Some(session) = &session {
            session.close();
            debug!(session_id = %id, "Session removed");
        }
        session
    }

    /// Close every session, returning how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (_, session) in &drained {
            session.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }
}

/// Deregisters its session when dropped, tying the session's lifetime to
/// the stream body that owns the guard.
pub(crate) struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, id: impl Into<String>) -> Self {
        Self {
            registry,
            id: id.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            debug!(session_id = %self.id, "Event stream ended");
        }
    }
}
