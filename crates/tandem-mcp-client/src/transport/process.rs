//! Worker subprocess transport: newline-delimited JSON over stdin/stdout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tandem_mcp_json_rpc::JsonRpcMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{McpClientError, McpClientResult, ProtocolError, TransportError};
use crate::transport::{Transport, TransportType};

/// How long a worker may take to exit on its own after stdin is closed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bound on waiting for an exit status after stdout reaches end of file.
const EXIT_WAIT: Duration = Duration::from_millis(250);

/// Receives each line the worker writes to stderr.
pub type StderrHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: HashMap<String, String>,
    pub shutdown_grace: Duration,
    pub stderr_handler: StderrHandler,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stderr_handler: Arc::new(|line: &str| eprintln!("{}", line)),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_stderr_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.stderr_handler = Arc::new(handler);
        self
    }
}

impl std::fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct ExitInfo {
    success: bool,
    description: String,
}

impl ExitInfo {
    fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                success: status.success(),
                description: status.to_string(),
            },
            Err(e) => Self {
                success: false,
                description: format!("wait failed: {}", e),
            },
        }
    }
}

/// One read from the worker's stdout.
enum StdoutLine {
    Complete(Vec<u8>),
    /// End of file after a partial line of this many bytes
    Truncated(usize),
    Eof,
}

/// Buffers stdout so a read interrupted by cancellation resumes where it
/// stopped.
struct StdoutReader {
    reader: BufReader<ChildStdout>,
    partial: Vec<u8>,
}

impl StdoutReader {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            partial: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<StdoutLine> {
        self.reader.read_until(b'\n', &mut self.partial).await?;
        if self.partial.last() == Some(&b'\n') {
            return Ok(StdoutLine::Complete(std::mem::take(&mut self.partial)));
        }
        if self.partial.is_empty() {
            return Ok(StdoutLine::Eof);
        }
        let len = self.partial.len();
        self.partial.clear();
        Ok(StdoutLine::Truncated(len))
    }
}

/// Everything owned by one running worker.
struct ProcessHandle {
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stdout: tokio::sync::Mutex<StdoutReader>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    stderr_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Fired by `disconnect` so blocked senders and receivers return.
    closed: CancellationToken,
}

impl ProcessHandle {
    fn exit_info(&self) -> Option<ExitInfo> {
        (*self.exit.borrow()).clone()
    }

    fn is_alive(&self) -> bool {
        !self.closed.is_cancelled() && self.exit_info().is_none()
    }

    async fn wait_for_exit(&self, bound: Option<Duration>) -> Option<ExitInfo> {
        let mut exit = self.exit.clone();
        let waiting = async move {
            exit.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|info| (*info).clone())
        };
        match bound {
            Some(bound) => tokio::time::timeout(bound, waiting).await.ok().flatten(),
            None => waiting.await,
        }
    }
}

/// Spawns a worker and talks to it over its standard streams.
pub struct ProcessTransport {
    config: ProcessConfig,
    handle: parking_lot::Mutex<Option<Arc<ProcessHandle>>>,
    /// Serialises concurrent `connect` calls
    connect_lock: tokio::sync::Mutex<()>,
}

impl ProcessTransport {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            handle: parking_lot::Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// OS process id of the running worker.
    pub fn pid(&self) -> Option<u32> {
        self.handle.lock().as_ref().and_then(|h| h.pid)
    }

    fn current(&self) -> McpClientResult<Arc<ProcessHandle>> {
        self.handle
            .lock()
            .clone()
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    fn spawn(&self) -> McpClientResult<ProcessHandle> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(TransportError::Spawn)?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::ConnectionFailed("worker stdin was not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::ConnectionFailed("worker stdout was not captured".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TransportError::ConnectionFailed("worker stderr was not captured".to_string())
        })?;

        let handler = self.config.stderr_handler.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => handler(&line),
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "stderr drain stopped");
                        break;
                    }
                }
            }
        });

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, kill_rx, exit_tx));

        info!(command = %self.config.command, pid = ?pid, "Spawned worker process");

        Ok(ProcessHandle {
            pid,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            stdout: tokio::sync::Mutex::new(StdoutReader::new(stdout)),
            exit: exit_rx,
            kill: parking_lot::Mutex::new(Some(kill_tx)),
            stderr_task: parking_lot::Mutex::new(Some(stderr_task)),
            closed: CancellationToken::new(),
        })
    }
}

impl ProcessTransport {
    /// Close stdin, wait out the grace window, kill if needed, then wait for
    /// the stderr drain.
    async fn shutdown(&self, handle: Arc<ProcessHandle>) {
        handle.closed.cancel();
        // dropping stdin closes the pipe
        drop(handle.stdin.lock().await.take());

        if handle
            .wait_for_exit(Some(self.config.shutdown_grace))
            .await
            .is_none()
        {
            warn!(
                pid = ?handle.pid,
                grace = ?self.config.shutdown_grace,
                "Worker did not exit after stdin closed, killing"
            );
            let kill = handle.kill.lock().take();
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            handle.wait_for_exit(None).await;
        }

        let stderr_task = handle.stderr_task.lock().take();
        if let Some(task) = stderr_task {
            let _ = task.await;
        }
    }
}

/// Owns the child and publishes its exit status exactly once. Dropping the
/// kill sender counts as a kill request.
async fn watch_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill worker process");
            }
            child.wait().await
        }
    };
    let info = ExitInfo::from_wait(status);
    debug!(status = %info.description, "Worker process exited");
    exit.send_replace(Some(info));
}

#[async_trait]
impl Transport for ProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Process
    }

    async fn connect(&self, cancel: &CancellationToken) -> McpClientResult<()> {
        if cancel.is_cancelled() {
            return Err(McpClientError::Cancelled);
        }
        let _connecting = self.connect_lock.lock().await;

        let stale = {
            let mut slot = self.handle.lock();
            if slot.as_ref().is_some_and(|h| h.is_alive()) {
                return Ok(());
            }
            slot.take()
        };
        if let Some(stale) = stale {
            debug!(pid = ?stale.pid, "Previous worker is gone, respawning");
            self.shutdown(stale).await;
        }

        let handle = Arc::new(self.spawn()?);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> McpClientResult<()> {
        let _connecting = self.connect_lock.lock().await;
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let pid = handle.pid;
        self.shutdown(handle).await;
        info!(pid = ?pid, "Worker process disconnected");
        Ok(())
    }

    async fn send(
        &self,
        message: &JsonRpcMessage,
        cancel: &CancellationToken,
    ) -> McpClientResult<()> {
        let handle = self.current()?;
        if let Some(exit) = handle.exit_info() {
            return Err(TransportError::ProcessExited(exit.description).into());
        }

        let line = message.to_line()?;
        let write = async {
            let mut stdin = handle.stdin.lock().await;
            let stdin = stdin.as_mut().ok_or(TransportError::Closed)?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
            Ok::<(), TransportError>(())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpClientError::Cancelled),
            _ = handle.closed.cancelled() => Err(TransportError::Closed.into()),
            written = write => match written {
                Ok(()) => Ok(()),
                Err(TransportError::Io(e)) => match handle.wait_for_exit(Some(EXIT_WAIT)).await {
                    Some(exit) => Err(TransportError::ProcessExited(exit.description).into()),
                    None => Err(TransportError::Io(e).into()),
                },
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn receive(&self, cancel: &CancellationToken) -> McpClientResult<JsonRpcMessage> {
        let handle = self.current()?;

        loop {
            let read = async { handle.stdout.lock().await.next_line().await };
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(McpClientError::Cancelled),
                _ = handle.closed.cancelled() => return Err(TransportError::Closed.into()),
                line = read => line.map_err(TransportError::Io)?,
            };

            let line = match line {
                StdoutLine::Complete(line) => line,
                StdoutLine::Truncated(len) => {
                    return Err(TransportError::ConnectionLost(format!(
                        "truncated message: stdout ended after {} bytes without a line terminator",
                        len
                    ))
                    .into());
                }
                StdoutLine::Eof => {
                    return match handle.wait_for_exit(Some(EXIT_WAIT)).await {
                        Some(exit) if !exit.success => {
                            Err(TransportError::ProcessExited(exit.description).into())
                        }
                        _ => Err(TransportError::Closed.into()),
                    };
                }
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return JsonRpcMessage::parse_slice(&line)
                .map_err(|e| ProtocolError::Envelope(e).into());
        }
    }

    fn is_connected(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| h.is_alive())
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.closed.cancel();
            if let Some(kill) = handle.kill.lock().take() {
                let _ = kill.send(());
            }
        }
    }
}
