//! Client engine: handshake, request correlation, notification routing.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tandem_mcp_json_rpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId,
};
use tandem_mcp_protocol::{InitializeParams, InitializeResult, LoggingLevel, methods};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{McpClientError, McpClientResult, ProtocolError, SessionError, TransportError};
use crate::pending::PendingCalls;
use crate::transport::{BoxedTransport, Transport};

/// Callback for server notifications of one method.
pub type NotificationHandler =
    Arc<dyn Fn(JsonRpcNotification) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Initializing,
    Initialized,
}

/// State shared with the background reader.
struct ClientInner {
    transport: Arc<dyn Transport>,
    state: Mutex<ConnectionState>,
    pending: Arc<PendingCalls>,
    handlers: RwLock<HashMap<String, NotificationHandler>>,
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn route(&self, message: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Response(response) => {
                if !self.pending.complete(&response.id, Ok(response.result)) {
                    debug!(id = %response.id, "Dropping response for unknown request");
                }
                None
            }
            JsonRpcMessage::Error(error) => {
                match error.id {
                    Some(id) => {
                        if !self.pending.complete(&id, Err(error.error.into())) {
                            debug!(id = %id, "Dropping error for unknown request");
                        }
                    }
                    None => warn!(
                        code = error.error.code,
                        message = %error.error.message,
                        "Server reported an error without a request id"
                    ),
                }
                None
            }
            JsonRpcMessage::Notification(notification) => {
                let handler = self.handlers.read().get(&notification.method).cloned();
                match handler {
                    Some(handler) => {
                        tokio::spawn(handler(notification));
                    }
                    None => debug!(method = %notification.method, "No handler for notification"),
                }
                None
            }
            JsonRpcMessage::Request(request) => {
                warn!(method = %request.method, "Rejecting server-initiated request");
                Some(JsonRpcError::method_not_found(request.id, &request.method).into())
            }
        }
    }
}

/// Continuously receive from the transport until stopped or the channel dies.
async fn run_reader(inner: Arc<ClientInner>, stop: CancellationToken) {
    loop {
        match inner.transport.receive(&stop).await {
            Ok(message) => {
                if let Some(reply) = inner.route(message) {
                    if let Err(e) = inner.transport.send(&reply, &stop).await {
                        warn!(error = %e, "Failed to answer server request");
                    }
                }
            }
            Err(McpClientError::Cancelled) => break,
            Err(e @ McpClientError::Protocol(_)) => {
                warn!(error = %e, "Discarding malformed inbound message");
            }
            Err(e) => {
                if matches!(e, McpClientError::Transport(TransportError::Closed)) {
                    info!("Transport closed");
                } else {
                    warn!(error = %e, "Transport failed");
                }
                inner.set_state(ConnectionState::Disconnected);
                let failed = inner.pending.fail_all(&e);
                if failed > 0 {
                    debug!(count = failed, "Failed in-flight requests");
                }
                break;
            }
        }
    }
}

/// MCP client over any [`Transport`].
pub struct McpClient {
    inner: Arc<ClientInner>,
    config: ClientConfig,
    next_id: AtomicI64,
    server_info: Mutex<Option<InitializeResult>>,
    reader: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl McpClient {
    pub fn new(transport: BoxedTransport, config: ClientConfig) -> Self {
        Self::from_arc(Arc::from(transport), config)
    }

    pub fn from_arc(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                state: Mutex::new(ConnectionState::Disconnected),
                pending: PendingCalls::new(),
                handlers: RwLock::new(HashMap::new()),
            }),
            config,
            next_id: AtomicI64::new(1),
            server_info: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ConnectionState::Initialized
    }

    /// Result of the last successful handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    /// Number of calls awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Connect the transport and run the initialize handshake.
    pub async fn connect(&self, cancel: &CancellationToken) -> McpClientResult<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(SessionError::AlreadyConnected.into());
            }
            *state = ConnectionState::Connected;
        }

        info!(transport = %self.inner.transport.transport_type(), "Connecting to MCP server");
        let connected = tokio::time::timeout(
            self.config.timeouts.connect,
            self.inner.transport.connect(cancel),
        )
        .await
        .unwrap_or(Err(McpClientError::Timeout));
        if let Err(e) = connected {
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.start_reader();

        let initialized = tokio::time::timeout(
            self.config.timeouts.initialization,
            self.initialize(cancel),
        )
        .await
        .unwrap_or(Err(McpClientError::Timeout));
        match initialized {
            Ok(result) => {
                info!(
                    server = %result.server_info.name,
                    version = %result.server_info.version,
                    protocol = %result.protocol_version,
                    "MCP session initialized"
                );
                *self.server_info.lock() = Some(result);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "MCP handshake failed");
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// `initialize` request plus the `initialized` notification.
    async fn initialize(&self, cancel: &CancellationToken) -> McpClientResult<InitializeResult> {
        self.inner.set_state(ConnectionState::Initializing);

        let params = InitializeParams::new(
            self.config.protocol_version,
            self.config.capabilities.clone(),
            self.config.client_info.clone(),
        );
        let response = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(params)?), cancel)
            .await
            .map_err(|e| match e {
                McpClientError::ServerError { code, message, .. } => {
                    McpClientError::from(SessionError::InitializeFailed(format!(
                        "{} (code {})",
                        message, code
                    )))
                }
                other => other,
            })?;

        let result: InitializeResult = serde_json::from_value(response).map_err(|e| {
            ProtocolError::InvalidResponse(format!("malformed initialize result: {}", e))
        })?;
        result.negotiated_version().map_err(ProtocolError::from)?;

        self.inner.set_state(ConnectionState::Initialized);
        self.send_notification(methods::NOTIFICATION_INITIALIZED, None, cancel)
            .await?;
        Ok(result)
    }

    fn start_reader(&self) {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_reader(self.inner.clone(), stop.clone()));
        if let Some((old_stop, _)) = self.reader.lock().replace((stop, task)) {
            old_stop.cancel();
        }
    }

    async fn teardown(&self) {
        let reader = self.reader.lock().take();
        if let Some((stop, _)) = &reader {
            stop.cancel();
        }
        if let Err(e) = self.inner.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        if let Some((_, task)) = reader {
            let _ = task.await;
        }
        self.inner.pending.fail_all(&TransportError::Closed.into());
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Stop the reader, fail in-flight calls and release the transport.
    pub async fn disconnect(&self) -> McpClientResult<()> {
        info!("Disconnecting from MCP server");
        self.teardown().await;
        *self.server_info.lock() = None;
        Ok(())
    }

    fn check_ready(&self, method: &str) -> McpClientResult<()> {
        match self.state() {
            ConnectionState::Initialized => Ok(()),
            ConnectionState::Initializing if method == methods::INITIALIZE => Ok(()),
            ConnectionState::Disconnected => Err(TransportError::NotConnected.into()),
            _ => Err(SessionError::NotInitialized.into()),
        }
    }

    /// Send a request and wait for its reply, until `cancel` fires.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> McpClientResult<Value> {
        self.check_ready(method)?;

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (_guard, reply) = self.inner.pending.register(id.clone())?;

        debug!(id = %id, method = method, "Sending request");
        let message: JsonRpcMessage = JsonRpcRequest::new(id, method, params).into();
        self.inner.transport.send(&message, cancel).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpClientError::Cancelled),
            reply = reply => reply.unwrap_or_else(|_| Err(TransportError::Closed.into())),
        }
    }

    /// [`request`](Self::request) bounded by the configured request timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> McpClientResult<Value> {
        self.call_with_timeout(method, params, self.config.timeouts.request)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpClientResult<Value> {
        let cancel = CancellationToken::new();
        tokio::time::timeout(timeout, self.request(method, params, &cancel))
            .await
            .unwrap_or(Err(McpClientError::Timeout))
    }

    /// Send a notification. Returns once it is written; nothing is awaited.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> McpClientResult<()> {
        self.check_ready(method)?;
        debug!(method = method, "Sending notification");
        let message: JsonRpcMessage = JsonRpcNotification::new(method, params).into();
        self.inner.transport.send(&message, cancel).await
    }

    /// [`send_notification`](Self::send_notification) bounded by the
    /// configured request timeout.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpClientResult<()> {
        let cancel = CancellationToken::new();
        tokio::time::timeout(
            self.config.timeouts.request,
            self.send_notification(method, params, &cancel),
        )
        .await
        .unwrap_or(Err(McpClientError::Timeout))
    }

    /// Route notifications of `method` to `handler`, replacing any previous one.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandler =
            Arc::new(move |n| -> BoxFuture<'static, ()> { Box::pin(handler(n)) });
        self.inner.handlers.write().insert(method.into(), handler);
    }

    pub fn remove_notification_handler(&self, method: &str) -> bool {
        self.inner.handlers.write().remove(method).is_some()
    }

    pub async fn ping(&self) -> McpClientResult<()> {
        self.call(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self, cursor: Option<&str>) -> McpClientResult<Value> {
        debug!("Listing tools");
        self.call(methods::TOOLS_LIST, cursor_params(cursor)).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpClientResult<Value> {
        debug!(tool = name, "Calling tool");
        self.call(
            methods::TOOLS_CALL,
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    pub async fn list_resources(&self, cursor: Option<&str>) -> McpClientResult<Value> {
        debug!("Listing resources");
        self.call(methods::RESOURCES_LIST, cursor_params(cursor))
            .await
    }

    pub async fn list_resource_templates(&self, cursor: Option<&str>) -> McpClientResult<Value> {
        self.call(methods::RESOURCES_TEMPLATES_LIST, cursor_params(cursor))
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> McpClientResult<Value> {
        debug!(uri = uri, "Reading resource");
        self.call(methods::RESOURCES_READ, Some(json!({"uri": uri})))
            .await
    }

    pub async fn subscribe(&self, uri: &str) -> McpClientResult<()> {
        self.call(methods::RESOURCES_SUBSCRIBE, Some(json!({"uri": uri})))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe(&self, uri: &str) -> McpClientResult<()> {
        self.call(methods::RESOURCES_UNSUBSCRIBE, Some(json!({"uri": uri})))
            .await
            .map(|_| ())
    }

    pub async fn list_prompts(&self, cursor: Option<&str>) -> McpClientResult<Value> {
        debug!("Listing prompts");
        self.call(methods::PROMPTS_LIST, cursor_params(cursor)).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpClientResult<Value> {
        let mut params = json!({"name": name});
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.call(methods::PROMPTS_GET, Some(params)).await
    }

    pub async fn set_log_level(&self, level: LoggingLevel) -> McpClientResult<()> {
        self.call(methods::LOGGING_SET_LEVEL, Some(json!({"level": level})))
            .await
            .map(|_| ())
    }

    /// `completion/complete`; the params object is passed through untouched.
    pub async fn complete(&self, params: Value) -> McpClientResult<Value> {
        self.call(methods::COMPLETION_COMPLETE, Some(params)).await
    }
}

fn cursor_params(cursor: Option<&str>) -> Option<Value> {
    cursor.map(|cursor| json!({"cursor": cursor}))
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some((stop, _)) = self.reader.get_mut().take() {
            stop.cancel();
        }
    }
}

/// Builder for [`McpClient`]
pub struct McpClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: Option<ClientConfig>,
}

impl McpClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            config: None,
        }
    }

    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn with_boxed_transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(Arc::from(transport));
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> McpClientResult<McpClient> {
        let transport = self
            .transport
            .ok_or_else(|| McpClientError::config("Transport must be set before building client"))?;
        Ok(McpClient::from_arc(
            transport,
            self.config.unwrap_or_default(),
        ))
    }
}

impl Default for McpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
