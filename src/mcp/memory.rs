//! In-process tool provider.
//!
//! [`MemoryConnector`] answers the MCP handshake, `tools/list` and
//! `tools/call` from registered handlers without any network. Used by the
//! test suites and handy for dry runs of an orchestration.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::protocol::{
    CallToolResult, Incoming, JsonRpcError, ToolCatalogEntry, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION,
};
use super::transport::{Connection, Connector, Outbound};
use crate::error::McpError;

/// Handler for one tool: arguments in, result or JSON-RPC error out.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<CallToolResult, JsonRpcError>> + Send + Sync>;

type Slot = Arc<Mutex<Option<mpsc::Sender<Value>>>>;

#[derive(Default)]
struct ServerState {
    tools: Vec<ToolCatalogEntry>,
    handlers: HashMap<String, ToolHandler>,
    calls: Vec<(String, Value)>,
    connections: Vec<Slot>,
    failing_opens: usize,
}

/// Connector backed by an in-process MCP server.
///
/// Cloning shares the server, so a test can keep a handle for assertions
/// while the registry owns another.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ServerState>>,
    opens: Arc<AtomicUsize>,
    open_delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with a custom handler.
    pub fn with_tool<F>(self, entry: ToolCatalogEntry, handler: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<CallToolResult, JsonRpcError>>
            + Send
            + Sync
            + 'static,
    {
        let handler: ToolHandler = Arc::new(handler);
        if let Ok(mut state) = self.state.try_lock() {
            state.handlers.insert(entry.name.clone(), handler);
            state.tools.push(entry);
        }
        self
    }

    /// Register a tool that always answers with `text`.
    pub fn with_text_tool(self, name: &str, text: &str) -> Self {
        let text = text.to_string();
        self.with_tool(ToolCatalogEntry::new(name, None, None), move |_| {
            let text = text.clone();
            async move { Ok(CallToolResult::text(text)) }.boxed()
        })
    }

    /// Register a tool that answers with `text` after `delay`.
    pub fn with_delayed_tool(self, name: &str, delay: Duration, text: &str) -> Self {
        let text = text.to_string();
        self.with_tool(ToolCatalogEntry::new(name, None, None), move |_| {
            let text = text.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(CallToolResult::text(text))
            }
            .boxed()
        })
    }

    /// Delay every `open` (simulates a slow handshake).
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Make the next `count` opens fail with a transport error.
    pub async fn fail_next_opens(&self, count: usize) {
        self.state.lock().await.failing_opens = count;
    }

    /// Number of `open` calls so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Tool calls received so far, in arrival order.
    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().await.calls.clone()
    }

    /// Close every open connection from the server side.
    pub async fn drop_connections(&self) {
        let slots: Vec<Slot> = self.state.lock().await.connections.drain(..).collect();
        for slot in slots {
            slot.lock().await.take();
        }
    }

    /// Send a server notification on every open connection.
    pub async fn notify(&self, method: &str) {
        let slots: Vec<Slot> = self.state.lock().await.connections.clone();
        let message = json!({"jsonrpc": JSONRPC_VERSION, "method": method});
        for slot in slots {
            if let Some(tx) = slot.lock().await.clone() {
                let _ = tx.send(message.clone()).await;
            }
        }
    }

    /// Replace the advertised catalog (handlers are kept).
    pub async fn set_tools(&self, tools: Vec<ToolCatalogEntry>) {
        self.state.lock().await.tools = tools;
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, _endpoint: &str) -> Result<Connection, McpError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(McpError::Transport("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let slot: Slot = Arc::new(Mutex::new(Some(tx)));
        state.connections.push(slot.clone());

        Ok(Connection {
            outbound: Arc::new(MemoryOutbound {
                state: self.state.clone(),
                slot,
            }),
            inbound: rx,
        })
    }
}

struct MemoryOutbound {
    state: Arc<Mutex<ServerState>>,
    slot: Slot,
}

impl MemoryOutbound {
    async fn answer(&self, method: &str, params: Value) -> Result<Value, JsonRpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "memory", "version": "0"}
            })),
            "tools/list" => {
                let tools = self.state.lock().await.tools.clone();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                let handler = {
                    let mut state = self.state.lock().await;
                    state.calls.push((name.clone(), arguments.clone()));
                    state.handlers.get(&name).cloned()
                };
                let Some(handler) = handler else {
                    return Err(JsonRpcError {
                        code: -32602,
                        message: format!("Unknown tool: {}", name),
                        data: None,
                    });
                };
                let result = handler(arguments).await?;
                serde_json::to_value(result).map_err(|e| JsonRpcError {
                    code: -32603,
                    message: e.to_string(),
                    data: None,
                })
            }
            "ping" => Ok(json!({})),
            other => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", other),
                data: None,
            }),
        }
    }
}

#[async_trait]
impl Outbound for MemoryOutbound {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let Incoming::Request { id, method } = Incoming::classify(&message) else {
            // Notifications and responses need no answer.
            return Ok(());
        };
        if self.slot.lock().await.is_none() {
            return Err(McpError::ConnectionLost);
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let outbound = MemoryOutbound {
            state: self.state.clone(),
            slot: self.slot.clone(),
        };
        tokio::spawn(async move {
            let reply = match outbound.answer(&method, params).await {
                Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}),
                Err(error) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": error}),
            };
            let tx = outbound.slot.lock().await.clone();
            if let Some(tx) = tx {
                let _ = tx.send(reply).await;
            }
        });
        Ok(())
    }

    async fn close(&self) {
        self.slot.lock().await.take();
    }
}
