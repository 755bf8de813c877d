//! JSON-RPC 2.0 transport over the automation server's standard streams.
//!
//! One transport owns one subprocess's stdin/stdout pair for the process's
//! lifetime. At most one call is in flight at a time; the stream is not
//! multiplexed, so concurrent callers queue on the transport mutex held by
//! [`McpToolClient`] instead of interleaving bytes on the wire.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webpilot_core::{Error, Result};

use crate::frame::FrameDecoder;
use crate::supervisor::IoHandles;

const CHUNK_SIZE: usize = 8192;
const CHUNK_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_READ_ATTEMPTS: u32 = 100;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Request/response correlation over a byte stream. Generic over the stream
/// halves so framing and correlation are testable against in-memory pipes.
pub struct RpcTransport<R, W> {
    reader: R,
    writer: W,
    decoder: FrameDecoder,
    next_id: u64,
}

impl<R, W> RpcTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            next_id: 1,
        }
    }

    /// Send one request and read until its correlated response is assembled
    /// or the deadline passes. A late response for an earlier id is logged
    /// and discarded; it never crashes the transport or mis-pairs a call.
    pub async fn call(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let line = serde_json::to_string(&request)?;

        debug!(id, method, "rpc request");
        self.write_line(&line).await?;

        match tokio::time::timeout(timeout, self.read_matching(id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no response to '{}' (id {}) within {:?}",
                method, id, timeout
            ))),
        }
    }

    /// Fire-and-forget notification (no id, no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if let Some(params) = params {
            message["params"] = params;
        }
        let line = serde_json::to_string(&message)?;
        self.write_line(&line).await
    }

    /// MCP handshake: `initialize` request followed by the
    /// `notifications/initialized` notification.
    pub async fn initialize(&mut self, timeout: Duration) -> Result<Value> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "webpilot",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self.call("initialize", Some(params), timeout).await?;
        debug!("automation server initialized");
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("write error: {}", e)))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Transport(format!("write error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush error: {}", e)))?;
        Ok(())
    }

    /// Read in bounded chunks, reassembling frames until one carries the
    /// expected id. Bounded attempts keep a silent server from pinning the
    /// caller past its own deadline.
    async fn read_matching(&mut self, id: u64) -> Result<Value> {
        let mut attempts: u32 = 0;

        loop {
            // Drain whatever is already buffered, including stale frames
            // left over from a call that timed out.
            while let Some(frame) = self.decoder.try_extract() {
                match serde_json::from_str::<RpcResponse>(&frame) {
                    Ok(response) => match response.id {
                        Some(rid) if rid == id => {
                            if let Some(err) = response.error {
                                return Err(Error::Rpc {
                                    code: err.code,
                                    message: err.message,
                                    data: err.data,
                                });
                            }
                            return Ok(response.result.unwrap_or(Value::Null));
                        }
                        Some(stale) => {
                            warn!(stale, expected = id, "dropping response with no pending call");
                        }
                        None => {
                            debug!("ignoring server notification");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "discarding unparseable frame");
                    }
                }
            }

            if attempts >= MAX_READ_ATTEMPTS {
                return Err(Error::Transport(format!(
                    "no complete response after {} read attempts ({} bytes accumulated)",
                    attempts,
                    self.decoder.buffered()
                )));
            }
            attempts += 1;

            let mut chunk = [0u8; CHUNK_SIZE];
            match tokio::time::timeout(CHUNK_TIMEOUT, self.reader.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(Error::Transport("server stdout closed".into()));
                }
                Ok(Ok(n)) => self.decoder.push(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(Error::Transport(format!("read error: {}", e)));
                }
                // Per-chunk timeout: nothing arrived yet, count the attempt.
                Err(_) => {}
            }
        }
    }
}

/// Transport bound to a supervised subprocess's stream pair.
pub type ServerTransport = RpcTransport<ChildStdout, ChildStdin>;

/// The seam the resolver and facade drive tool calls through. Lets tests
/// script the automation server without a subprocess.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value>;
}

/// `tools/call` client over one supervised server. Clone-cheap; all clones
/// share (and serialize on) the same transport.
#[derive(Clone)]
pub struct McpToolClient {
    transport: Arc<Mutex<ServerTransport>>,
    call_timeout: Duration,
}

impl McpToolClient {
    pub fn new(handles: IoHandles, call_timeout: Duration) -> Self {
        Self {
            transport: Arc::new(Mutex::new(RpcTransport::new(handles.stdout, handles.stdin))),
            call_timeout,
        }
    }

    pub async fn initialize(&self) -> Result<Value> {
        let mut transport = self.transport.lock().await;
        transport.initialize(self.call_timeout).await
    }
}

#[async_trait]
impl ToolClient for McpToolClient {
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let params = json!({ "name": tool, "arguments": arguments });

        // The mutex is the queue: a second call issued while one is pending
        // waits here instead of interleaving bytes on the shared stream.
        let result = {
            let mut transport = self.transport.lock().await;
            transport
                .call("tools/call", Some(params), self.call_timeout)
                .await?
        };

        // MCP wraps tool failures as { content: [...], isError: true }.
        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            let message = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("tool returned an error");
            return Err(Error::Rpc {
                code: -1,
                message: message.to_string(),
                data: Some(result.clone()),
            });
        }

        Ok(result)
    }
}
