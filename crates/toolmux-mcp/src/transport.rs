//! Transport seam between the lifecycle core and provider subprocesses.
//!
//! The manager and handles only see the [`ToolChannel`] and
//! [`ChannelSpawner`] traits, so the lifecycle logic is testable without
//! spawning real processes. [`StdioSpawner`] is the production
//! implementation: it launches the provider as a child process and speaks
//! MCP JSON-RPC 2.0 over its stdio.

use crate::protocol::{InitializeResult, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use toolmux_core::{ToolDescriptor, ToolOutput, ToolmuxError, ToolmuxResult};
use tracing::{debug, error, info};

/// Default wait for a single JSON-RPC response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A duplex channel to one connected provider.
#[async_trait]
pub trait ToolChannel: Send + Sync {
    /// Query the provider's advertised tools.
    async fn list_tools(&self) -> ToolmuxResult<Vec<ToolDescriptor>>;

    /// Invoke a tool on the provider, passing arguments through untouched.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolmuxResult<ToolOutput>;

    /// Close the channel and stop the backing subprocess.
    async fn close(&mut self) -> ToolmuxResult<()>;
}

/// Spawns a [`ToolChannel`] for one provider command line.
#[async_trait]
pub trait ChannelSpawner: Send + Sync {
    /// Start the provider subprocess and establish the channel, including
    /// any protocol handshake. Blocks until the provider is usable.
    async fn spawn(
        &self,
        provider: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> ToolmuxResult<Box<dyn ToolChannel>>;
}

/// Production spawner: stdio subprocess transport with the MCP handshake.
#[derive(Debug, Clone, Copy)]
pub struct StdioSpawner {
    request_timeout: Duration,
}

impl StdioSpawner {
    /// Spawner with a non-default per-request timeout, covering both the
    /// handshake and later tool queries.
    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for StdioSpawner {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[async_trait]
impl ChannelSpawner for StdioSpawner {
    async fn spawn(
        &self,
        provider: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> ToolmuxResult<Box<dyn ToolChannel>> {
        let channel =
            StdioChannel::open(provider, command, args, env, self.request_timeout).await?;
        Ok(Box::new(channel))
    }
}

/// Channel to an MCP server subprocess, multiplexing JSON-RPC requests
/// over the child's stdin/stdout.
pub struct StdioChannel {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    next_id: AtomicU64,
    provider: String,
    request_timeout: Duration,
}

impl StdioChannel {
    /// Spawn the subprocess, start the response reader, and perform the
    /// MCP `initialize` handshake.
    async fn open(
        provider: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> ToolmuxResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            // The child must not outlive the channel on any exit path.
            .kill_on_drop(true);

        for (key, val) in env {
            cmd.env(key, val);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ToolmuxError::Connect(format!(
                "Failed to spawn provider '{provider}' ({command}): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolmuxError::Connect(format!("provider '{provider}' stdin not available")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolmuxError::Connect(format!("provider '{provider}' stdout not available")))?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Reader task: routes responses to waiting requests by id.
        let pending_reader = pending.clone();
        let reader_provider = provider.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(provider = %reader_provider, "Provider stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                if let Some(id) = resp.id {
                                    let mut map = pending_reader.lock().await;
                                    if let Some(tx) = map.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                                // Notifications (no id) are ignored.
                            }
                            Err(e) => {
                                debug!(
                                    provider = %reader_provider,
                                    line = %trimmed,
                                    error = %e,
                                    "Non-JSON-RPC line from provider"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!(provider = %reader_provider, error = %e, "Error reading provider stdout");
                        break;
                    }
                }
            }
        });

        let channel = Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            provider: provider.to_string(),
            request_timeout,
        };

        let init = channel.initialize().await?;
        info!(
            provider = %channel.provider,
            version = %init.protocol_version,
            "Provider channel initialized"
        );

        channel
            .notify("notifications/initialized", None)
            .await
            .map_err(ToolmuxError::Connect)?;

        Ok(channel)
    }

    /// Send a JSON-RPC request and wait for the matching response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        let msg =
            serde_json::to_string(&req).map_err(|e| format!("Failed to serialize request: {e}"))?;

        self.write_line(&msg).await?;

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(format!("provider '{}' closed before responding", self.provider));
            }
            Err(_) => {
                // Drop the stale waiter so a provider that never answers
                // this id cannot accumulate pending entries.
                self.pending.lock().await.remove(&id);
                return Err(format!(
                    "request '{method}' to provider '{}' timed out",
                    self.provider
                ));
            }
        };

        if let Some(err) = &resp.error {
            return Err(format!(
                "provider '{}' returned error {}: {}",
                self.provider, err.code, err.message
            ));
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<(), String> {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(serde_json::json!({})),
        });
        let serialized = serde_json::to_string(&msg)
            .map_err(|e| format!("Failed to serialize notification: {e}"))?;
        self.write_line(&serialized).await
    }

    async fn write_line(&self, msg: &str) -> Result<(), String> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(msg.as_bytes())
            .await
            .map_err(|e| format!("Failed to write to provider stdin: {e}"))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| format!("Failed to write newline: {e}"))?;
        stdin
            .flush()
            .await
            .map_err(|e| format!("Failed to flush provider stdin: {e}"))?;
        Ok(())
    }

    /// Perform the MCP initialize handshake.
    async fn initialize(&self) -> ToolmuxResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "toolmux",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self
            .request("initialize", Some(params))
            .await
            .map_err(ToolmuxError::Connect)?;
        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| ToolmuxError::Connect("Empty initialize result".into()))?,
        )
        .map_err(|e| ToolmuxError::Connect(format!("Failed to parse initialize result: {e}")))?;

        Ok(result)
    }
}

#[async_trait]
impl ToolChannel for StdioChannel {
    async fn list_tools(&self) -> ToolmuxResult<Vec<ToolDescriptor>> {
        let resp = self
            .request("tools/list", None)
            .await
            .map_err(ToolmuxError::Query)?;
        let result = resp
            .result
            .ok_or_else(|| ToolmuxError::Query("Empty tools/list result".into()))?;

        let tools: Vec<ToolDescriptor> = serde_json::from_value(
            result
                .get("tools")
                .cloned()
                .unwrap_or(serde_json::json!([])),
        )
        .map_err(|e| ToolmuxError::Query(format!("Failed to parse tools: {e}")))?;

        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolmuxResult<ToolOutput> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self
            .request("tools/call", Some(params))
            .await
            .map_err(ToolmuxError::Query)?;
        let result = resp
            .result
            .ok_or_else(|| ToolmuxError::Query("Empty tools/call result".into()))?;

        serde_json::from_value(result)
            .map_err(|e| ToolmuxError::Query(format!("Failed to parse tool result: {e}")))
    }

    async fn close(&mut self) -> ToolmuxResult<()> {
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            // Already-exited children report InvalidInput; that is fine.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(ToolmuxError::Disconnect(format!(
                    "Failed to stop provider '{}': {e}",
                    self.provider
                )));
            }
        }
        child.wait().await.map_err(|e| {
            ToolmuxError::Disconnect(format!("Failed to reap provider '{}': {e}", self.provider))
        })?;
        debug!(provider = %self.provider, "Provider subprocess stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_nonexistent_binary_is_connect_error() {
        let spawner = StdioSpawner::default();
        let result = spawner
            .spawn("ghost", "/nonexistent/mcp-server", &[], &HashMap::new())
            .await;
        match result {
            Err(ToolmuxError::Connect(msg)) => assert!(msg.contains("ghost")),
            Err(other) => panic!("expected Connect error, got {other:?}"),
            Ok(_) => panic!("expected Connect error, got a channel"),
        }
    }

    /// Shell provider that completes the handshake and then never answers
    /// another request.
    #[cfg(unix)]
    const SILENT_AFTER_HANDSHAKE: &str = r#"read req; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'; read note; read req2; sleep 10"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_request_timeout_clears_pending_entry() {
        let channel = StdioChannel::open(
            "slow",
            "sh",
            &["-c".to_string(), SILENT_AFTER_HANDSHAKE.to_string()],
            &HashMap::new(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

        let result = channel.list_tools().await;
        match result {
            Err(ToolmuxError::Query(msg)) => assert!(msg.contains("timed out"), "got: {msg}"),
            Err(other) => panic!("expected Query timeout, got {other:?}"),
            Ok(_) => panic!("expected Query timeout, got tools"),
        }
        // The timed-out waiter must not linger in the pending map.
        assert!(channel.pending.lock().await.is_empty());
    }
}
