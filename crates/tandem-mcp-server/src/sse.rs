//! HTTP+SSE server multiplexing sessions over one dispatcher.
//!
//! `GET {sse_path}` opens a session and streams its events. The first event
//! is `endpoint`, carrying the URL the client must POST messages to
//! (`{base_url}{message_path}?sessionId=<id>`). Replies are delivered both as
//! a `message` event on the owning session's stream and as the body of the
//! `202 Accepted` response to the POST.

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, Limited, StreamBody};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_mcp_json_rpc::{
    DispatchError, JsonRpcDispatcher, JsonRpcError, JsonRpcErrorObject, JsonRpcHandler,
    JsonRpcMessage, RequestContext, ToJsonRpcError,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cors::CorsLayer;
use crate::session::{SessionGuard, SessionRegistry};
use crate::{McpServerError, Result};

pub const ENDPOINT_EVENT: &str = "endpoint";
pub const MESSAGE_EVENT: &str = "message";
const KEEPALIVE_FRAME: &[u8] = b": keepalive\n\n";

type ServerBody = UnsyncBoxBody<Bytes, Infallible>;

/// Configuration for the SSE server
#[derive(Debug, Clone)]
pub struct SseServerConfig {
    /// Address to bind to in [`SseServer::run`]
    pub bind_address: SocketAddr,
    /// Public base URL used in endpoint events. Derived from the listener
    /// address when unset.
    pub base_url: Option<String>,
    /// Path of the event stream
    pub sse_path: String,
    /// Path messages are POSTed to
    pub message_path: String,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Frames buffered per session before senders wait
    pub channel_buffer_size: usize,
    /// Interval between `: keepalive` comments; `None` disables them
    pub keepalive_interval: Option<Duration>,
    /// Enable CORS headers on every response
    pub enable_cors: bool,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: None,
            sse_path: "/sse".to_string(),
            message_path: "/message".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            channel_buffer_size: 100,
            keepalive_interval: Some(Duration::from_secs(30)),
            enable_cors: true,
        }
    }
}

/// Builder for [`SseServer`]
pub struct SseServerBuilder<E: ToJsonRpcError = DispatchError> {
    config: SseServerConfig,
    dispatcher: JsonRpcDispatcher<E>,
}

impl SseServerBuilder {
    pub fn new() -> Self {
        Self::with_dispatcher(JsonRpcDispatcher::new())
    }
}

impl Default for SseServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ToJsonRpcError> SseServerBuilder<E> {
    /// Start from a dispatcher that is already populated
    pub fn with_dispatcher(dispatcher: JsonRpcDispatcher<E>) -> Self {
        Self {
            config: SseServerConfig::default(),
            dispatcher,
        }
    }

    pub fn config(mut self, config: SseServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    pub fn sse_path(mut self, path: impl Into<String>) -> Self {
        self.config.sse_path = path.into();
        self
    }

    pub fn message_path(mut self, path: impl Into<String>) -> Self {
        self.config.message_path = path.into();
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Register a JSON-RPC handler for specific methods
    pub fn register_handler<H>(mut self, methods: Vec<String>, handler: H) -> Self
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.dispatcher.register_methods(methods, handler);
        self
    }

    /// Register an async closure for one method
    pub fn register_fn<F, Fut>(mut self, method: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(Option<serde_json::Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, E>>
            + Send
            + 'static,
    {
        self.dispatcher.register_fn(method, handler_fn);
        self
    }

    /// Register a default handler for unhandled methods
    pub fn default_handler<H>(mut self, handler: H) -> Self
    where
        H: JsonRpcHandler<Error = E> + 'static,
    {
        self.dispatcher.set_default_handler(handler);
        self
    }

    pub fn build(self) -> SseServer<E> {
        SseServer {
            inner: Arc::new(ServerState {
                config: self.config,
                dispatcher: self.dispatcher,
                sessions: Arc::new(SessionRegistry::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

struct ServerState<E: ToJsonRpcError> {
    config: SseServerConfig,
    dispatcher: JsonRpcDispatcher<E>,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

/// SSE server handle. Clones share sessions and shutdown state.
pub struct SseServer<E: ToJsonRpcError = DispatchError> {
    inner: Arc<ServerState<E>>,
}

impl<E: ToJsonRpcError> Clone for SseServer<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SseServer {
    pub fn builder() -> SseServerBuilder {
        SseServerBuilder::new()
    }
}

impl<E: ToJsonRpcError> SseServer<E> {
    pub fn config(&self) -> &SseServerConfig {
        &self.inner.config
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.inner.sessions.ids()
    }

    /// Bind the configured address and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.inner.config.bind_address).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener` until [`shutdown`](Self::shutdown).
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let base_url = match &self.inner.config.base_url {
            Some(base_url) => base_url.trim_end_matches('/').to_string(),
            None => format!("http://{}", local_addr),
        };
        info!("SSE server listening on {}", local_addr);
        info!(
            "Event stream at {}{}, messages at {}{}",
            base_url, self.inner.config.sse_path, base_url, self.inner.config.message_path
        );

        let router = Arc::new(Router {
            state: Arc::clone(&self.inner),
            base_url,
        });
        let shutdown = self.inner.shutdown.clone();

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("New connection from {}", peer_addr);

            let router = Arc::clone(&router);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let router = Arc::clone(&router);
                    async move { Ok::<_, Infallible>(router.route(req).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);
                let served = tokio::select! {
                    served = conn.as_mut() => served,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(err) = served {
                    let err_str = err.to_string();
                    if err_str.contains("connection closed before message completed") {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }

        info!("SSE server stopped accepting connections");
        Ok(())
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let closed = self.inner.sessions.close_all();
        info!(sessions = closed, "SSE server shut down");
    }

    /// Push a `message` event to one session.
    pub async fn send_event_to_session<T>(&self, session_id: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let session = self
            .inner
            .sessions
            .get(session_id)
            .ok_or_else(|| McpServerError::SessionNotFound(session_id.to_string()))?;
        let data = serde_json::to_string(payload)?;
        session.send_frame(event_frame(MESSAGE_EVENT, &data)).await
    }
}

/// Format one SSE event. `data` must not contain newlines.
pub fn event_frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

struct Router<E: ToJsonRpcError> {
    state: Arc<ServerState<E>>,
    base_url: String,
}

impl<E: ToJsonRpcError> Router<E> {
    async fn route(&self, req: Request<Incoming>) -> Response<ServerBody> {
        let config = &self.state.config;
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("Handling {} {}", method, path);

        let mut response = if config.enable_cors && method == Method::OPTIONS {
            status_response(StatusCode::NO_CONTENT, empty_body())
        } else if path == config.sse_path {
            if method == Method::GET {
                self.open_stream()
            } else {
                status_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    full_body("Method not allowed"),
                )
            }
        } else if path == config.message_path {
            self.handle_message(req).await
        } else {
            status_response(StatusCode::NOT_FOUND, full_body("Not Found"))
        };

        if config.enable_cors {
            CorsLayer::apply_cors_headers(response.headers_mut());
        }
        response
    }

    fn open_stream(&self) -> Response<ServerBody> {
        let config = &self.state.config;
        let (session, frames) = self.state.sessions.create(config.channel_buffer_size);
        let endpoint = format!(
            "{}{}?sessionId={}",
            self.base_url,
            config.message_path,
            session.id()
        );
        info!(session_id = %session.id(), "SSE session opened");

        let guard = SessionGuard::new(Arc::clone(&self.state.sessions), session.id());
        let body = session_stream(
            guard,
            event_frame(ENDPOINT_EVENT, &endpoint),
            frames,
            session.closed_token(),
            config.keepalive_interval,
        );

        let mut response = status_response(StatusCode::OK, body);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        CorsLayer::apply_allow_origin(headers);
        response
    }

    async fn handle_message(&self, req: Request<Incoming>) -> Response<ServerBody> {
        if req.method() != Method::POST {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcErrorObject::invalid_request(Some("Method not allowed".to_string())),
            );
        }

        let session_id = req.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "sessionId")
                .map(|(_, value)| value.into_owned())
        });
        let Some(session_id) = session_id.filter(|id| !id.is_empty()) else {
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcErrorObject::invalid_params("Missing sessionId"),
            );
        };
        let Some(session) = self.state.sessions.get(&session_id) else {
            debug!(session_id = %session_id, "POST for unknown session");
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcErrorObject::invalid_params("Invalid session ID"),
            );
        };

        let body = match Limited::new(req.into_body(), self.state.config.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Failed to read request body");
                return rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    JsonRpcErrorObject::invalid_request(Some(format!(
                        "Unreadable request body: {}",
                        err
                    ))),
                );
            }
        };

        let message = match JsonRpcMessage::parse_slice_for_reply(&body) {
            Ok(message) => message,
            Err(rejection) => {
                warn!(
                    session_id = %session_id,
                    code = rejection.error.code,
                    "Rejecting malformed message"
                );
                return rpc_error_body(StatusCode::BAD_REQUEST, &rejection.into());
            }
        };

        debug!(session_id = %session_id, method = ?message.method(), "Dispatching message");
        let context =
            RequestContext::new(self.state.shutdown.child_token()).with_session(&session_id);
        let Some(reply) = self.state.dispatcher.dispatch(message, context).await else {
            return status_response(StatusCode::ACCEPTED, empty_body());
        };

        let data = match serde_json::to_string(&reply) {
            Ok(data) => data,
            Err(err) => {
                error!(error = %err, "Failed to serialize reply");
                return rpc_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    JsonRpcErrorObject::internal_error(Some(err.to_string())),
                );
            }
        };
        if let Err(err) = session.send_frame(event_frame(MESSAGE_EVENT, &data)).await {
            warn!(session_id = %session_id, error = %err, "Could not deliver reply on stream");
        }
        json_response(StatusCode::ACCEPTED, data)
    }
}

/// Body of one session's event stream. Owns the guard, so the session is
/// deregistered as soon as hyper drops the body.
fn session_stream(
    guard: SessionGuard,
    endpoint_frame: Bytes,
    mut frames: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
    keepalive: Option<Duration>,
) -> ServerBody {
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Frame::data(endpoint_frame));

        let mut keepalive = keepalive.map(|period| {
            tokio::time::interval_at(Instant::now() + period, period)
        });
        loop {
            let frame = tokio::select! {
                biased;
                _ = closed.cancelled() => None,
                frame = frames.recv() => frame,
                _ = next_keepalive(&mut keepalive) => Some(Bytes::from_static(KEEPALIVE_FRAME)),
            };
            match frame {
                Some(frame) => yield Ok(Frame::data(frame)),
                None => break,
            }
        }
    };
    StreamBody::new(stream).boxed_unsync()
}

async fn next_keepalive(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn full_body(text: impl Into<Bytes>) -> ServerBody {
    Full::new(text.into()).boxed_unsync()
}

fn empty_body() -> ServerBody {
    Empty::<Bytes>::new().boxed_unsync()
}

fn status_response(status: StatusCode, body: ServerBody) -> Response<ServerBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, json: String) -> Response<ServerBody> {
    let mut response = status_response(status, full_body(json));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn rpc_error_response(status: StatusCode, error: JsonRpcErrorObject) -> Response<ServerBody> {
    rpc_error_body(status, &JsonRpcError::new(None, error).into())
}

fn rpc_error_body(status: StatusCode, message: &JsonRpcMessage) -> Response<ServerBody> {
    match serde_json::to_string(message) {
        Ok(json) => json_response(status, json),
        Err(err) => {
            error!(error = %err, "Failed to serialize error response");
            status_response(StatusCode::INTERNAL_SERVER_ERROR, empty_body())
        }
    }
}
