//! In-flight call table: identifier to single-use completion channel.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tandem_mcp_json_rpc::RequestId;
use tokio::sync::oneshot;

use crate::error::{McpClientError, McpClientResult, ProtocolError};

pub(crate) type Reply = McpClientResult<Value>;

#[derive(Default)]
pub(crate) struct PendingCalls {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>,
}

impl PendingCalls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert an entry for `id`. The returned guard removes it again when
    /// dropped, which covers cancellation and timeouts.
    pub fn register(
        self: &Arc<Self>,
        id: RequestId,
    ) -> McpClientResult<(PendingGuard, oneshot::Receiver<Reply>)> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(ProtocolError::InvalidResponse(format!(
                "request id {} is already in flight",
                id
            ))
            .into());
        }
        entries.insert(id.clone(), tx);
        Ok((
            PendingGuard {
                calls: Arc::clone(self),
                id,
            },
            rx,
        ))
    }

    /// Deliver a reply. Returns false when nobody is waiting for `id`.
    pub fn complete(&self, id: &RequestId, reply: Reply) -> bool {
        let sender = self.entries.lock().remove(id);
        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Fail every waiter, used when the transport goes away.
    pub fn fail_all(&self, cause: &McpClientError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, sender) in drained {
            let _ = sender.send(Err(cause.replicate()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn remove(&self, id: &RequestId) {
        self.entries.lock().remove(id);
    }
}

pub(crate) struct PendingGuard {
    calls: Arc<PendingCalls>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.calls.remove(&self.id);
    }
}
