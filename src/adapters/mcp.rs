//! JSON-RPC 2.0 client for an engine server speaking MCP over stdio.
//!
//! ```text
//! ┌──────────────┐  request line   ┌──────────────┐
//! │ call_tool()  │────────────────▶│ child stdin  │
//! │   awaits     │                 └──────────────┘
//! │  oneshot rx  │                 ┌──────────────┐
//! │      ▲       │                 │ child stdout │
//! └──────┼───────┘                 └──────┬───────┘
//!        │    pending[id].send()   ┌──────▼───────┐
//!        └─────────────────────────│ reader task  │
//!                                  └──────────────┘
//! ```
//!
//! Every request gets a fresh id and an entry in the pending table. The
//! reader task resolves entries by id; a deadline removes the entry and
//! fails the request with a timeout. Whoever removes the entry first owns
//! the outcome, so each request settles exactly once and late responses are
//! dropped. When the server's output closes, every pending request fails
//! with a transport error and the client stops accepting requests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// MCP protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// JSON-RPC error code some servers use for approval denials
const APPROVAL_RPC_CODE: i64 = -32001;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);
const DEFAULT_RETRIES: u32 = 1;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Protocol-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    #[error("MCP request timeout for {method}")]
    Timeout { method: String },

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Approval(String),

    #[error("{0}")]
    ToolFailure(String),

    #[error("{0}")]
    Config(String),
}

impl McpError {
    /// Stable machine code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "MCP_TIMEOUT",
            Self::Transport(_) => "MCP_TRANSPORT",
            Self::Approval(_) => "MCP_APPROVAL",
            Self::ToolFailure(_) => "MCP_TOOL",
            Self::Config(_) => "MCP_CONFIG",
        }
    }

    /// Only transport-class failures are retried by the client
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }

    /// Approval denial or generic tool failure, by error code or message
    pub fn classify(message: impl Into<String>, rpc_code: Option<i64>) -> Self {
        let message = message.into();
        if rpc_code == Some(APPROVAL_RPC_CODE) {
            return Self::Approval(message);
        }

        let normalized = message.to_lowercase();
        let approval = ["approval", "permission", "blocked", "policy"]
            .iter()
            .any(|needle| normalized.contains(needle));

        if approval {
            Self::Approval(message)
        } else {
            Self::ToolFailure(message)
        }
    }
}

/// Client tunables
#[derive(Debug, Clone)]
pub struct McpClientOptions {
    /// Server command line, split on whitespace
    pub command: String,

    /// Working directory of the server process
    pub cwd: PathBuf,

    /// Extra environment for the server process
    pub env: HashMap<String, String>,

    /// Per-request deadline
    pub timeout: Duration,

    /// Extra attempts for retryable failures
    pub retries: u32,

    /// How long shutdown waits before killing the server
    pub shutdown_grace: Duration,
}

impl McpClientOptions {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// A tool advertised by `tools/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'a str,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Deserialize)]
struct JsonRpcErrorObject {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

type Outcome = Result<Value, McpError>;
type PendingTable = Arc<StdMutex<HashMap<String, oneshot::Sender<Outcome>>>>;

/// Live connection to a server
struct Connection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    reader_task: JoinHandle<()>,
}

/// MCP client over a child process's stdin/stdout
pub struct McpStdioClient {
    options: McpClientOptions,
    pending: PendingTable,
    running: Arc<AtomicBool>,
    conn: Mutex<Option<Connection>>,
}

impl McpStdioClient {
    pub fn new(options: McpClientOptions) -> Self {
        Self {
            options,
            pending: Arc::new(StdMutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            conn: Mutex::new(None),
        }
    }

    /// Connect over an already-open byte stream and perform the handshake
    pub async fn connect<R, W>(options: McpClientOptions, reader: R, writer: W) -> Result<Self, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client = Self::new(options);
        *client.conn.lock().await = Some(client.attach(reader, Box::new(writer), None));
        client.handshake().await?;
        Ok(client)
    }

    pub fn options(&self) -> &McpClientOptions {
        &self.options
    }

    /// True while the server's output is open
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Spawn the server and perform the handshake. No-op when running.
    pub async fn start(&self) -> Result<(), McpError> {
        {
            let mut conn = self.conn.lock().await;
            if conn.is_some() && self.is_running() {
                return Ok(());
            }

            let (bin, args) = split_command(&self.options.command)?;

            // stderr is discarded: an unread pipe would eventually block the server
            let mut child = Command::new(bin)
                .args(args)
                .current_dir(&self.options.cwd)
                .envs(&self.options.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| McpError::Transport(format!("Failed to spawn MCP process '{}': {}", bin, e)))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| McpError::Transport("Failed to capture MCP stdout".to_string()))?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| McpError::Transport("Failed to capture MCP stdin".to_string()))?;

            info!(command = %self.options.command, pid = child.id(), "MCP server spawned");
            *conn = Some(self.attach(stdout, Box::new(stdin), Some(child)));
        }

        self.handshake().await
    }

    /// List the tools the server exposes
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let result = self.request("tools/list", json!({})).await?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|tool| {
                        let name = tool.get("name")?.as_str()?;
                        if name.is_empty() {
                            return None;
                        }
                        Some(ToolInfo {
                            name: name.to_string(),
                            description: tool
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(tools)
    }

    /// Invoke a tool.
    ///
    /// A result flagged `isError` is classified and returned as an error.
    /// Otherwise returns `structuredContent`, else `content`, else the whole
    /// result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let mut result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let message = match result.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "{}".to_string(),
            };
            return Err(match McpError::classify(message, None) {
                McpError::Approval(m) => {
                    McpError::Approval(format!("MCP tool call failed for {}: {}", name, m))
                }
                other => McpError::ToolFailure(format!("MCP tool call failed for {}: {}", name, other)),
            });
        }

        if let Some(obj) = result.as_object_mut() {
            for key in ["structuredContent", "content"] {
                match obj.remove(key) {
                    Some(Value::Null) | None => {}
                    Some(value) => return Ok(value),
                }
            }
        }

        Ok(result)
    }

    /// Send a request, retrying transport-class failures with fresh ids
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut attempt = 0;

        loop {
            match self.request_once(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(method, attempt, error = %e, "retrying MCP request");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop the server.
    ///
    /// Closing stdin asks the server to exit; it is killed if still alive
    /// after the grace period. Calling this more than once is a no-op.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let Some(conn) = self.conn.lock().await.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::SeqCst);
        let Connection {
            writer,
            child,
            reader_task,
        } = conn;
        drop(writer);

        if let Some(mut child) = child {
            match tokio::time::timeout(self.options.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "MCP server exited"),
                Ok(Err(e)) => warn!(error = %e, "failed to wait for MCP server"),
                Err(_) => {
                    warn!("MCP server ignored shutdown, killing");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "failed to kill MCP server");
                    }
                }
            }
        }

        reader_task.abort();
        reject_all(&self.pending, McpError::Transport("MCP client shut down.".to_string()));

        Ok(())
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        if let Err(e) = self.request("initialize", params).await {
            warn!(error = %e, "MCP initialize failed, tearing down");
            self.shutdown().await?;
            return Err(e);
        }

        self.notify("notifications/initialized", json!({})).await
    }

    /// Fire-and-forget message with no id
    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let message = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
            params: &params,
        };
        let line = encode_line(&message)?;
        self.write_line(&line).await
    }

    async fn request_once(&self, method: &str, params: &Value) -> Result<Value, McpError> {
        let id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        // Checked after registering so a concurrent exit either sees the
        // entry (and rejects it) or we see the exit here
        if !self.is_running() {
            lock(&self.pending).remove(&id);
            return Err(McpError::Transport("MCP process is not running.".to_string()));
        }

        let message = JsonRpcRequest {
            jsonrpc: "2.0",
            id: &id,
            method,
            params,
        };
        let sent = match encode_line(&message) {
            Ok(line) => self.write_line(&line).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            return Err(e);
        }

        debug!(request_id = %id, method, "MCP request sent");

        match tokio::time::timeout(self.options.timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Transport(format!(
                "MCP request {} dropped without a response",
                method
            ))),
            Err(_) => {
                if lock(&self.pending).remove(&id).is_some() {
                    warn!(request_id = %id, method, "MCP request timed out");
                    Err(McpError::Timeout {
                        method: method.to_string(),
                    })
                } else {
                    // The reader settled it while the deadline fired
                    rx.try_recv().unwrap_or_else(|_| {
                        Err(McpError::Timeout {
                            method: method.to_string(),
                        })
                    })
                }
            }
        }
    }

    async fn write_line(&self, line: &[u8]) -> Result<(), McpError> {
        let mut conn = self.conn.lock().await;
        let conn = conn
            .as_mut()
            .ok_or_else(|| McpError::Transport("MCP process is not running.".to_string()))?;

        let write_failed =
            |e: std::io::Error| McpError::Transport(format!("Failed to write to MCP process: {}", e));

        conn.writer.write_all(line).await.map_err(write_failed)?;
        conn.writer.flush().await.map_err(write_failed)
    }

    fn attach<R>(
        &self,
        reader: R,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        child: Option<Child>,
    ) -> Connection
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.running.store(true, Ordering::SeqCst);
        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&self.pending),
            Arc::clone(&self.running),
        ));

        Connection {
            writer,
            child,
            reader_task,
        }
    }
}

/// Dispatch response lines until the stream closes, then fail everything pending
async fn read_loop<R>(reader: R, pending: PendingTable, running: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "MCP process exited (stdout closed).".to_string(),
            Ok(_) => dispatch_line(&String::from_utf8_lossy(&buf), &pending),
            Err(e) => break format!("MCP process error: {}", e),
        }
    };

    debug!(%reason, "MCP reader stopped");
    running.store(false, Ordering::SeqCst);
    reject_all(&pending, McpError::Transport(reason));
}

/// Settle the pending request a line answers, if any
fn dispatch_line(line: &str, pending: &PendingTable) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line) else {
        debug!("dropping non-JSON line from MCP server");
        return;
    };

    let id = match response.id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return,
    };

    let Some(tx) = lock(pending).remove(&id) else {
        debug!(request_id = %id, "dropping response with no pending request");
        return;
    };

    let outcome = match response.error {
        Some(error) => {
            let message = error
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Unknown MCP error".to_string());
            Err(McpError::classify(message, error.code))
        }
        None => Ok(response.result.unwrap_or(Value::Null)),
    };

    // The requester may have given up already
    let _ = tx.send(outcome);
}

fn reject_all(pending: &PendingTable, error: McpError) {
    let drained: Vec<_> = lock(pending).drain().collect();
    if !drained.is_empty() {
        warn!(count = drained.len(), error = %error, "rejecting pending MCP requests");
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(error.clone()));
    }
}

fn split_command(command: &str) -> Result<(&str, Vec<&str>), McpError> {
    let mut parts = command.split_whitespace();
    let bin = parts
        .next()
        .ok_or_else(|| McpError::Config("MCP command is empty.".to_string()))?;
    Ok((bin, parts.collect()))
}

fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, McpError> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| McpError::Transport(format!("Failed to encode MCP message: {}", e)))?;
    line.push(b'\n');
    Ok(line)
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
