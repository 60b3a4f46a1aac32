//! Line-delimited JSON-RPC server over stdin/stdout.
//!
//! Each input line is one message; each reply is written as one line.
//! Stdout carries protocol traffic only, so diagnostics must go to stderr.

use std::sync::Arc;

use tandem_mcp_json_rpc::{
    DispatchError, JsonRpcDispatcher, JsonRpcMessage, RequestContext, ToJsonRpcError,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;

/// Stdio server driving one dispatcher
pub struct StdioServer<E: ToJsonRpcError = DispatchError> {
    dispatcher: Arc<JsonRpcDispatcher<E>>,
}

impl<E: ToJsonRpcError> StdioServer<E> {
    pub fn new(dispatcher: JsonRpcDispatcher<E>) -> Self {
        Self::from_arc(Arc::new(dispatcher))
    }

    pub fn from_arc(dispatcher: Arc<JsonRpcDispatcher<E>>) -> Self {
        Self { dispatcher }
    }

    /// Serve the process's stdin and stdout until EOF or `cancel` fires.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout(), cancel)
            .await
    }

    /// Serve an arbitrary reader/writer pair.
    ///
    /// Messages are handled one at a time. Cancellation is observed between
    /// lines, so a request already being dispatched still gets its reply.
    pub async fn serve_io<R, W>(&self, reader: R, mut writer: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        info!("Stdio server started");

        loop {
            line.clear();
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping stdio server");
                    break;
                }
                read = reader.read_until(b'\n', &mut line) => read?,
            };
            if read == 0 {
                debug!("Input closed");
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            if let Some(reply) = self.handle_line(&line, &cancel).await {
                writer.write_all(reply.to_line()?.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("Stdio server stopped");
        Ok(())
    }

    /// Decode and dispatch one input line. Undecodable input, invalid UTF-8
    /// included, is answered with an error reply instead of ending the loop.
    async fn handle_line(&self, line: &[u8], cancel: &CancellationToken) -> Option<JsonRpcMessage> {
        match JsonRpcMessage::parse_slice_for_reply(line) {
            Ok(message) => {
                debug!(method = ?message.method(), id = ?message.id(), "Handling message");
                self.dispatcher
                    .dispatch(message, RequestContext::new(cancel.child_token()))
                    .await
            }
            Err(error) => {
                warn!(
                    code = error.error.code,
                    message = %error.error.message,
                    "Rejecting malformed message"
                );
                Some(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    fn echo_server() -> StdioServer {
        let mut dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_fn("ping", |_params, _ctx| async move { Ok(Value::Null) });
        dispatcher.register_fn("echo", |params, _ctx| async move {
            Ok(params.unwrap_or(Value::Null))
        });
        StdioServer::new(dispatcher)
    }

    /// Feed `input` and collect every output line until the server stops.
    async fn run(input: impl AsRef<[u8]>) -> Vec<Value> {
        let (mut client_in, server_in) = duplex(4096);
        let (server_out, client_out) = duplex(4096);
        client_in.write_all(input.as_ref()).await.unwrap();
        drop(client_in);

        echo_server()
            .serve_io(server_in, server_out, CancellationToken::new())
            .await
            .unwrap();

        let mut lines = BufReader::new(client_out).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_ping_returns_null_result() {
        let out = run("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
        assert_eq!(out, vec![json!({"jsonrpc": "2.0", "id": 1, "result": null})]);
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error_with_null_id() {
        let out = run("{not json\n").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["error"]["code"], -32700);
        assert_eq!(out[0]["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_answered_and_loop_continues() {
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"\xff\xfe\"}\n".to_vec();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n");

        let out = run(input).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["error"]["code"], -32700);
        assert_eq!(out[0]["id"], Value::Null);
        assert_eq!(out[1], json!({"jsonrpc": "2.0", "id": 2, "result": null}));
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let out = run("{\"jsonrpc\":\"1.0\",\"id\":\"a\",\"method\":\"ping\"}\n").await;
        assert_eq!(out[0]["error"]["code"], -32600);
        assert_eq!(out[0]["id"], "a");
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply_and_blank_lines_skipped() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":\"x\",\"method\":\"echo\",\"params\":{\"k\":[1]}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"missing\"}\n",
        );
        let out = run(input).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], json!({"jsonrpc": "2.0", "id": "x", "result": {"k": [1]}}));
        assert_eq!(out[1]["error"]["code"], -32601);
        assert_eq!(out[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_server() {
        let (_client_in, server_in) = duplex(64);
        let (server_out, _client_out) = duplex(64);
        let cancel = CancellationToken::new();

        let server = echo_server();
        let serving = server.serve_io(server_in, server_out, cancel.clone());
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), serving)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}
