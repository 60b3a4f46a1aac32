//! SSE transport: a long-lived event stream for inbound messages plus POSTs to
//! the endpoint the server announces in its first event.

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION};
use reqwest::{Client, Response};
use std::sync::Arc;
use tandem_mcp_json_rpc::JsonRpcMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SseTransportConfig;
use crate::error::{McpClientError, McpClientResult, ProtocolError, TransportError};
use crate::event_stream::{SseDecoder, SseEvent};
use crate::transport::{Transport, TransportType};

pub const ENDPOINT_EVENT: &str = "endpoint";
pub const MESSAGE_EVENT: &str = "message";

type EventResult = McpClientResult<SseEvent>;

struct SseConnection {
    endpoint: Url,
    events: tokio::sync::Mutex<mpsc::Receiver<EventResult>>,
    closed: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SseConnection {
    async fn shutdown(&self) {
        self.closed.cancel();
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }
}

/// SSE transport for MCP client (HTTP+SSE)
pub struct SseTransport {
    client: Client,
    /// URL of the event stream
    stream_url: Url,
    config: SseTransportConfig,
    connection: parking_lot::Mutex<Option<Arc<SseConnection>>>,
    /// Serialises concurrent `connect` calls
    connect_lock: tokio::sync::Mutex<()>,
}

impl SseTransport {
    pub fn new(stream_url: &str) -> McpClientResult<Self> {
        Self::with_config(stream_url, SseTransportConfig::default())
    }

    pub fn with_config(stream_url: &str, config: SseTransportConfig) -> McpClientResult<Self> {
        let url = Url::parse(stream_url)
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::ConnectionFailed(format!(
                "Invalid scheme for SSE transport: {}",
                url.scheme()
            ))
            .into());
        }

        // no total timeout here: it would cut the event stream
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_url: url,
            config,
            connection: parking_lot::Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The POST URL announced by the server, once connected.
    pub fn endpoint(&self) -> Option<Url> {
        self.connection.lock().as_ref().map(|c| c.endpoint.clone())
    }

    fn current(&self) -> McpClientResult<Arc<SseConnection>> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    /// Resolve the endpoint event payload and require it to share our origin.
    fn resolve_endpoint(&self, data: &str) -> McpClientResult<Url> {
        let endpoint = self.stream_url.join(data.trim()).map_err(|e| {
            ProtocolError::InvalidEndpoint(format!("{}: {}", data.trim(), e))
        })?;
        if endpoint.origin() != self.stream_url.origin() {
            return Err(ProtocolError::InvalidEndpoint(format!(
                "endpoint origin {} does not match connection origin {}",
                endpoint.origin().ascii_serialization(),
                self.stream_url.origin().ascii_serialization()
            ))
            .into());
        }
        Ok(endpoint)
    }

    async fn open_stream(&self, cancel: &CancellationToken) -> McpClientResult<Response> {
        let request = self
            .client
            .get(self.stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(McpClientError::Cancelled),
            response = request => response.map_err(|e| {
                TransportError::ConnectionFailed(format!("failed to connect to SSE stream: {}", e))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(
                TransportError::ConnectionFailed(format!("unexpected status code: {}", status))
                    .into(),
            );
        }
        Ok(response)
    }

    async fn await_endpoint(
        &self,
        events: &mut mpsc::Receiver<EventResult>,
        cancel: &CancellationToken,
    ) -> McpClientResult<Url> {
        let first = tokio::select! {
            _ = cancel.cancelled() => return Err(McpClientError::Cancelled),
            _ = tokio::time::sleep(self.config.connect_timeout) => return Err(McpClientError::Timeout),
            first = events.recv() => first,
        };

        match first {
            Some(Ok(event)) if event.event_type == ENDPOINT_EVENT => {
                self.resolve_endpoint(&event.data)
            }
            Some(Ok(event)) => Err(ProtocolError::UnexpectedEvent(format!(
                "expected \"{}\" as first event, got \"{}\"",
                ENDPOINT_EVENT, event.event_type
            ))
            .into()),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::ConnectionFailed(
                "event stream ended before endpoint was announced".to_string(),
            )
            .into()),
        }
    }
}

/// Decode the response body into events until the stream ends or `closed` fires.
async fn read_events(
    response: Response,
    sender: mpsc::Sender<EventResult>,
    closed: CancellationToken,
    max_line_length: usize,
) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::with_max_line_length(max_line_length);

    loop {
        let chunk = tokio::select! {
            _ = closed.cancelled() => return,
            chunk = stream.next() => chunk,
        };

        let events: Vec<EventResult> = match chunk {
            Some(Ok(bytes)) => match decoder.feed(&bytes) {
                Ok(events) => events.into_iter().map(Ok).collect(),
                Err(e) => {
                    error!(error = %e, "Dropping SSE stream");
                    let _ = forward(
                        &sender,
                        &closed,
                        Err(TransportError::ConnectionLost(e.to_string()).into()),
                    )
                    .await;
                    return;
                }
            },
            Some(Err(e)) => {
                error!(error = %e, "SSE stream error");
                let _ = forward(&sender, &closed, Err(TransportError::Http(e.to_string()).into()))
                    .await;
                return;
            }
            None => {
                if let Some(event) = decoder.finish() {
                    let _ = forward(&sender, &closed, Ok(event)).await;
                }
                debug!("SSE stream ended");
                return;
            }
        };

        for event in events {
            if !forward(&sender, &closed, event).await {
                debug!("Event receiver closed, stopping SSE stream");
                return;
            }
        }
    }
}

async fn forward(
    sender: &mpsc::Sender<EventResult>,
    closed: &CancellationToken,
    event: EventResult,
) -> bool {
    tokio::select! {
        _ = closed.cancelled() => false,
        sent = sender.send(event) => sent.is_ok(),
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    async fn connect(&self, cancel: &CancellationToken) -> McpClientResult<()> {
        let _connecting = self.connect_lock.lock().await;
        if self.connection.lock().is_some() {
            return Ok(());
        }

        info!(url = %self.stream_url, "Opening SSE stream");
        let response = self.open_stream(cancel).await?;

        let closed = CancellationToken::new();
        let (sender, mut events) = mpsc::channel(self.config.event_buffer.max(1));
        let reader = tokio::spawn(read_events(
            response,
            sender,
            closed.clone(),
            self.config.max_line_length,
        ));

        let endpoint = match self.await_endpoint(&mut events, cancel).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                closed.cancel();
                let _ = reader.await;
                warn!(error = %e, "SSE handshake failed");
                return Err(e);
            }
        };

        info!(endpoint = %endpoint, "SSE endpoint received");
        *self.connection.lock() = Some(Arc::new(SseConnection {
            endpoint,
            events: tokio::sync::Mutex::new(events),
            closed,
            reader: parking_lot::Mutex::new(Some(reader)),
        }));
        Ok(())
    }

    async fn disconnect(&self) -> McpClientResult<()> {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.shutdown().await;
            info!("SSE transport disconnected");
        }
        Ok(())
    }

    async fn send(
        &self,
        message: &JsonRpcMessage,
        cancel: &CancellationToken,
    ) -> McpClientResult<()> {
        let connection = self.current()?;

        let request = self
            .client
            .post(connection.endpoint.clone())
            .timeout(self.config.request_timeout)
            .json(message)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(McpClientError::Cancelled),
            _ = connection.closed.cancelled() => return Err(TransportError::Closed.into()),
            response = request => response.map_err(|e| {
                if e.is_timeout() {
                    McpClientError::Timeout
                } else {
                    TransportError::Http(e.to_string()).into()
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(
                TransportError::Http(format!("HTTP error {}: {}", status, error_text)).into(),
            );
        }
        Ok(())
    }

    async fn receive(&self, cancel: &CancellationToken) -> McpClientResult<JsonRpcMessage> {
        let connection = self.current()?;

        let next = async { connection.events.lock().await.recv().await };
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(McpClientError::Cancelled),
            _ = connection.closed.cancelled() => return Err(TransportError::Closed.into()),
            event = next => event,
        };

        match event {
            None => Err(TransportError::Closed.into()),
            Some(Err(e)) => Err(e),
            Some(Ok(event)) if event.event_type == MESSAGE_EVENT => {
                JsonRpcMessage::parse(&event.data).map_err(|e| ProtocolError::Envelope(e).into())
            }
            Some(Ok(event)) => Err(ProtocolError::UnexpectedEvent(event.event_type).into()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|c| !c.closed.is_cancelled())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.closed.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        let err = SseTransport::new("ftp://example.com/sse").err().unwrap();
        assert!(matches!(
            err,
            McpClientError::Transport(TransportError::ConnectionFailed(_))
        ));
        assert!(SseTransport::new("not a url").is_err());
    }

    #[test]
    fn test_endpoint_resolution() {
        let transport = SseTransport::new("http://127.0.0.1:9000/sse").unwrap();

        let relative = transport.resolve_endpoint("/message?sessionId=abc").unwrap();
        assert_eq!(relative.as_str(), "http://127.0.0.1:9000/message?sessionId=abc");

        let absolute = transport
            .resolve_endpoint(" http://127.0.0.1:9000/message?sessionId=abc ")
            .unwrap();
        assert_eq!(absolute, relative);

        let foreign = transport
            .resolve_endpoint("http://evil.example:9000/message?sessionId=abc")
            .unwrap_err();
        assert!(matches!(
            foreign,
            McpClientError::Protocol(ProtocolError::InvalidEndpoint(_))
        ));

        let other_port = transport.resolve_endpoint("http://127.0.0.1:9001/message");
        assert!(other_port.is_err());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let transport = SseTransport::new("http://127.0.0.1:9/sse").unwrap();
        assert!(!transport.is_connected());
        assert!(transport.endpoint().is_none());
        let err = transport
            .receive(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpClientError::Transport(TransportError::NotConnected)
        ));
        transport.disconnect().await.unwrap();
    }
}
