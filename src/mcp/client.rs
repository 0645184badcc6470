//! MCP protocol client
//!
//! [`McpClient`] owns one connection to one tool-provider endpoint:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connected -> Degraded -> Reconnecting -> Connected | Disconnected
//! ```
//!
//! All traffic for a connection goes through a single [`RpcPeer`], which keeps
//! one correlation table so concurrent requests (tool calls, keepalive probes,
//! catalog refreshes) never see each other's responses.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::protocol::{
    initialize_params, normalize_endpoint, sanitize_arguments, CallToolResult, Incoming,
    JsonRpcNotification, JsonRpcRequest, ToolCatalogEntry, ToolsPage, JSONRPC_VERSION,
    TOOLS_LIST_CHANGED,
};
use super::transport::{Connection, Connector, Outbound};
use crate::config::McpConfig;
use crate::error::McpError;
use crate::log_component;

/// Upper bound on `tools/list` pages followed for one catalog fetch.
const MAX_CATALOG_PAGES: usize = 100;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection loss detected, reconnection pending
    Degraded,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// RPC peer
// ============================================================================

/// Connection-level events surfaced by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerEvent {
    ToolsChanged,
    Closed,
}

type Waiter = oneshot::Sender<Result<Value, McpError>>;

/// JSON-RPC session over one open [`Connection`].
struct RpcPeer {
    outbound: Arc<dyn Outbound>,
    pending: Arc<Mutex<HashMap<u64, Waiter>>>,
    next_id: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl RpcPeer {
    /// Start routing inbound messages. `on_event` runs on the dispatcher task.
    fn spawn<F>(connection: Connection, on_event: F) -> Self
    where
        F: Fn(PeerEvent) + Send + Sync + 'static,
    {
        let Connection {
            outbound,
            mut inbound,
        } = connection;
        let pending: Arc<Mutex<HashMap<u64, Waiter>>> = Arc::new(Mutex::new(HashMap::new()));

        let task_pending = pending.clone();
        let task_outbound = outbound.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                match Incoming::classify(&message) {
                    Incoming::Response { id, result } => {
                        let waiter = task_pending.lock().await.remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(result.map_err(McpError::from));
                            }
                            None => debug!(id, "Dropping response to unknown request"),
                        }
                    }
                    Incoming::Notification { method } => {
                        if method == TOOLS_LIST_CHANGED {
                            on_event(PeerEvent::ToolsChanged);
                        } else {
                            debug!(method = %method, "Ignoring MCP notification");
                        }
                    }
                    Incoming::Request { id, method } => {
                        let reply = if method == "ping" {
                            json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": {}})
                        } else {
                            json!({
                                "jsonrpc": JSONRPC_VERSION,
                                "id": id,
                                "error": {"code": -32601, "message": format!("Method not found: {}", method)}
                            })
                        };
                        let outbound = task_outbound.clone();
                        tokio::spawn(async move {
                            if let Err(e) = outbound.send(reply).await {
                                debug!(error = %e, "Failed to answer server request");
                            }
                        });
                    }
                    Incoming::Unrecognized => debug!("Ignoring unrecognized MCP message"),
                }
            }

            for (_, tx) in task_pending.lock().await.drain() {
                let _ = tx.send(Err(McpError::ConnectionLost));
            }
            on_event(PeerEvent::Closed);
        });

        Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            dispatcher,
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = match serde_json::to_value(JsonRpcRequest::new(id, method, params)) {
            Ok(request) => request,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Protocol(e.to_string()));
            }
        };

        // The deadline covers delivery as well as the answer.
        let exchange = async {
            self.outbound.send(request).await?;
            rx.await.unwrap_or(Err(McpError::ConnectionLost))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = serde_json::to_value(JsonRpcNotification::new(method, params))
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        self.outbound.send(notification).await
    }

    async fn close(&self) {
        self.dispatcher.abort();
        for (_, tx) in self.pending.lock().await.drain() {
            let _ = tx.send(Err(McpError::ConnectionLost));
        }
        self.outbound.close().await;
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Fetch every page of the tool catalog.
async fn fetch_catalog(
    peer: &RpcPeer,
    timeout: Duration,
) -> Result<Vec<ToolCatalogEntry>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_CATALOG_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let page = ToolsPage::parse(peer.request("tools/list", params, timeout).await?)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(tools),
        }
    }

    warn!(pages = MAX_CATALOG_PAGES, "Tool catalog pagination did not terminate");
    Ok(tools)
}

// ============================================================================
// Backoff
// ============================================================================

/// Delay before connection attempt `attempt + 1`: `base * 1.5^attempt` plus
/// up to one second of jitter.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    // Sub-second clock noise is enough to decorrelate concurrent retries.
    let jitter_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 1000)
        .unwrap_or(0);
    Duration::from_millis(compute_backoff(attempt, base_delay_ms, jitter_ms))
}

/// Backoff arithmetic without the clock, for testing.
pub fn compute_backoff(attempt: u32, base_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms as f64 * 1.5f64.powi(attempt.min(16) as i32);
    (exponential as u64).saturating_add(jitter_ms)
}

// ============================================================================
// Client
// ============================================================================

struct Session {
    state: ConnectionState,
    peer: Option<Arc<RpcPeer>>,
    generation: u64,
    tools: Vec<ToolCatalogEntry>,
    last_successful_connection: Option<Instant>,
}

/// Connection manager for one MCP endpoint.
///
/// Methods that start background work take `self: &Arc<Self>`; background
/// tasks hold only weak references, so dropping the last `Arc` stops them.
pub struct McpClient {
    endpoint: String,
    config: McpConfig,
    connector: Arc<dyn Connector>,
    session: Mutex<Session>,
    /// Serializes connect and reconnect cycles
    connect_lock: Mutex<()>,
    next_generation: AtomicU64,
    connection_attempts: AtomicU32,
    created: Instant,
    last_used_ms: AtomicU64,
    keepalive: StdMutex<Option<JoinHandle<()>>>,
    reconnect: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a disconnected client for `endpoint`.
    pub fn new(
        endpoint: &str,
        config: McpConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, McpError> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint)?,
            config,
            connector,
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                peer: None,
                generation: 0,
                tools: Vec::new(),
                last_successful_connection: None,
            }),
            connect_lock: Mutex::new(()),
            next_generation: AtomicU64::new(0),
            connection_attempts: AtomicU32::new(0),
            created: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            keepalive: StdMutex::new(None),
            reconnect: StdMutex::new(None),
        })
    }

    /// The normalized endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Connection attempts made over the client's lifetime.
    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts.load(Ordering::SeqCst)
    }

    pub async fn last_successful_connection(&self) -> Option<Instant> {
        self.session.lock().await.last_successful_connection
    }

    /// Cached tool catalog.
    pub async fn tools(&self) -> Vec<ToolCatalogEntry> {
        self.session.lock().await.tools.clone()
    }

    /// Record activity for idle tracking.
    pub fn touch(&self) {
        let now = self.created.elapsed().as_millis() as u64;
        self.last_used_ms.store(now, Ordering::SeqCst);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_used_ms.load(Ordering::SeqCst));
        self.created.elapsed().saturating_sub(last)
    }

    /// Connect with bounded retries, fetch the catalog and start keepalive.
    ///
    /// A no-op when already connected. Fails only after every attempt failed.
    pub async fn connect(self: &Arc<Self>) -> Result<(), McpError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected().await {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting).await;
        match self.dial().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected).await;
                warn!(component = "mcp", endpoint = %self.endpoint, error = %e, "MCP connection failed");
                Err(e)
            }
        }
    }

    /// Run the retry loop. Callers hold `connect_lock` and own the state
    /// transition on failure.
    async fn dial(self: &Arc<Self>) -> Result<(), McpError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            self.connection_attempts.fetch_add(1, Ordering::SeqCst);

            match tokio::time::timeout(self.config.connect_timeout(), self.establish()).await {
                Ok(Ok((peer, generation, tools))) => {
                    self.install(peer, generation, tools).await;
                    return Ok(());
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "connection attempt timed out after {}s",
                        self.config.connect_timeout_secs
                    )
                }
            }

            warn!(
                endpoint = %self.endpoint,
                attempt = attempt + 1,
                max_attempts,
                error = %last_error,
                "MCP connection attempt failed"
            );

            if attempt + 1 < max_attempts {
                tokio::time::sleep(backoff_delay(attempt, self.config.retry_delay_ms)).await;
            }
        }

        Err(McpError::Connection {
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// One attempt: open, handshake, fetch catalog.
    async fn establish(
        self: &Arc<Self>,
    ) -> Result<(Arc<RpcPeer>, u64, Vec<ToolCatalogEntry>), McpError> {
        let connection = self.connector.open(&self.endpoint).await?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let weak = Arc::downgrade(self);
        let peer = Arc::new(RpcPeer::spawn(connection, move |event| {
            if let Some(client) = weak.upgrade() {
                client.on_peer_event(generation, event);
            }
        }));

        let timeout = self.config.call_timeout();
        peer.request("initialize", Some(initialize_params()), timeout)
            .await?;
        peer.notify("notifications/initialized", None).await?;
        let tools = fetch_catalog(&peer, timeout).await?;

        Ok((peer, generation, tools))
    }

    async fn install(self: &Arc<Self>, peer: Arc<RpcPeer>, generation: u64, tools: Vec<ToolCatalogEntry>) {
        let tool_count = tools.len();
        {
            let mut session = self.session.lock().await;
            session.state = ConnectionState::Connected;
            session.peer = Some(peer);
            session.generation = generation;
            session.tools = tools;
            session.last_successful_connection = Some(Instant::now());
        }
        self.touch();
        self.start_keepalive(generation);
        log_component!(info, "mcp", "Connected to MCP server", endpoint = self.endpoint.as_str(), tools = tool_count);
    }

    fn on_peer_event(self: &Arc<Self>, generation: u64, event: PeerEvent) {
        match event {
            PeerEvent::ToolsChanged => {
                let client = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.refresh_tools().await {
                        warn!(endpoint = %client.endpoint, error = %e, "Tool catalog refresh failed");
                    }
                });
            }
            PeerEvent::Closed => self.connection_lost(generation, "event stream closed".into()),
        }
    }

    fn start_keepalive(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let period = self.config.keepalive_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                match client.probe().await {
                    Ok(()) => debug!(endpoint = %client.endpoint, "Keepalive ok"),
                    Err(e) => {
                        client.connection_lost(generation, format!("keepalive failed: {}", e));
                        break;
                    }
                }
            }
        });

        let mut slot = self.keepalive.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn stop_keepalive(&self) {
        let mut slot = self.keepalive.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Liveness probe: a catalog listing whose result is discarded.
    async fn probe(&self) -> Result<(), McpError> {
        let peer = self.connected_peer().await?;
        peer.request("tools/list", None, self.config.call_timeout())
            .await
            .map(|_| ())
    }

    /// Schedule recovery for a lost connection unless one is already running.
    fn connection_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let mut slot = self.reconnect.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let client = self.clone();
        *slot = Some(tokio::spawn(async move {
            client.recover(generation, reason).await;
        }));
    }

    async fn recover(self: Arc<Self>, generation: u64, reason: String) {
        let (peer, last_success) = {
            let mut session = self.session.lock().await;
            if session.generation != generation || session.state != ConnectionState::Connected {
                return;
            }
            session.state = ConnectionState::Degraded;
            (session.peer.take(), session.last_successful_connection)
        };
        log_component!(warn, "mcp", "MCP connection lost", endpoint = self.endpoint.as_str(), reason = reason.as_str());

        self.stop_keepalive();
        if let Some(peer) = peer {
            peer.close().await;
        }

        tokio::time::sleep(self.config.reconnect_cooldown()).await;
        if let Some(last) = last_success {
            let since = last.elapsed();
            let min_interval = self.config.min_reconnect_interval();
            if since < min_interval {
                debug!(
                    endpoint = %self.endpoint,
                    wait_ms = (min_interval - since).as_millis() as u64,
                    "Deferring reconnection"
                );
                tokio::time::sleep(min_interval - since).await;
            }
        }

        let _guard = self.connect_lock.lock().await;
        let cycles = self.config.max_reconnect_attempts.max(1);
        for cycle in 1..=cycles {
            self.set_state(ConnectionState::Reconnecting).await;
            match self.dial().await {
                Ok(()) => {
                    log_component!(info, "mcp", "MCP connection re-established", endpoint = self.endpoint.as_str(), cycle = cycle);
                    return;
                }
                Err(e) => {
                    warn!(endpoint = self.endpoint.as_str(), cycle, error = %e, "Reconnection cycle failed")
                }
            }
            if cycle < cycles {
                tokio::time::sleep(self.config.reconnect_cooldown()).await;
            }
        }

        {
            let mut session = self.session.lock().await;
            session.state = ConnectionState::Disconnected;
            session.tools.clear();
        }
        log_component!(warn, "mcp", "Giving up on MCP endpoint", endpoint = self.endpoint.as_str(), cycles = cycles);
    }

    async fn set_state(&self, state: ConnectionState) {
        self.session.lock().await.state = state;
    }

    async fn connected_peer(&self) -> Result<Arc<RpcPeer>, McpError> {
        let session = self.session.lock().await;
        match (&session.state, &session.peer) {
            (ConnectionState::Connected, Some(peer)) => Ok(peer.clone()),
            _ => Err(McpError::NotConnected),
        }
    }

    /// Fetch the catalog from the server and replace the cached copy.
    pub async fn list_tools(&self) -> Result<Vec<ToolCatalogEntry>, McpError> {
        let peer = self.connected_peer().await?;
        let tools = fetch_catalog(&peer, self.config.call_timeout()).await?;
        self.session.lock().await.tools = tools.clone();
        self.touch();
        Ok(tools)
    }

    /// Re-fetch the catalog after the server announced a change.
    pub async fn refresh_tools(&self) -> Result<Vec<ToolCatalogEntry>, McpError> {
        let tools = self.list_tools().await?;
        log_component!(info, "mcp", "Tool catalog refreshed", endpoint = self.endpoint.as_str(), tools = tools.len());
        Ok(tools)
    }

    /// Call a tool.
    ///
    /// Only fails when the client is not connected. A call that exceeds the
    /// call timeout yields a non-error "may have completed" result; any other
    /// failure yields an error-flagged result describing it.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let peer = self.connected_peer().await?;
        self.touch();

        let known = self
            .session
            .lock()
            .await
            .tools
            .iter()
            .any(|t| t.name == name);
        if !known {
            log_component!(warn, "mcp", "Calling unverified tool", tool = name, endpoint = self.endpoint.as_str());
        }

        let params = json!({
            "name": name,
            "arguments": sanitize_arguments(arguments),
        });

        let outcome = peer
            .request("tools/call", Some(params), self.config.call_timeout())
            .await
            .and_then(|value| {
                serde_json::from_value::<CallToolResult>(value)
                    .map_err(|e| McpError::Protocol(format!("invalid tools/call result: {}", e)))
            });
        self.touch();

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_timeout() => {
                warn!(tool = name, error = %e, "Tool call timed out");
                Ok(CallToolResult::timed_out(name))
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                Ok(CallToolResult::error(format!(
                    "Error calling tool {}: {}",
                    name, e
                )))
            }
        }
    }

    /// Stop background work, close the transport and clear cached state.
    /// Idempotent.
    pub async fn disconnect(&self) {
        {
            let mut slot = self.reconnect.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.stop_keepalive();

        let peer = {
            let mut session = self.session.lock().await;
            session.state = ConnectionState::Disconnected;
            session.tools.clear();
            session.peer.take()
        };
        if let Some(peer) = peer {
            peer.close().await;
            log_component!(info, "mcp", "Disconnected from MCP server", endpoint = self.endpoint.as_str());
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        for slot in [&self.keepalive, &self.reconnect] {
            if let Some(handle) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::memory::MemoryConnector;
    use crate::mcp::protocol::JsonRpcError;
    use futures::FutureExt;

    const ENDPOINT: &str = "http://browser.test/sse";

    fn client_for(connector: &MemoryConnector, config: McpConfig) -> Arc<McpClient> {
        Arc::new(McpClient::new(ENDPOINT, config, Arc::new(connector.clone())).unwrap())
    }

    fn browser() -> MemoryConnector {
        MemoryConnector::new()
            .with_text_tool("browser_navigate", "navigated")
            .with_text_tool("browser_snapshot", "<html/>")
    }

    #[test]
    fn test_compute_backoff() {
        assert_eq!(compute_backoff(0, 1500, 0), 1500);
        assert_eq!(compute_backoff(1, 1500, 0), 2250);
        assert_eq!(compute_backoff(2, 1500, 250), 3625);
        let d = backoff_delay(0, 100);
        assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(1100));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_connect_fetches_catalog() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        client.connect().await.unwrap();
        assert!(client.is_connected().await);
        assert_eq!(client.connection_attempts(), 1);
        assert!(client.last_successful_connection().await.is_some());
        let names: Vec<String> = client.tools().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["browser_navigate", "browser_snapshot"]);

        // Already connected: no new dial
        client.connect().await.unwrap();
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_then_succeeds() {
        let connector = browser();
        connector.fail_next_opens(2).await;
        let client = client_for(&connector, McpConfig::default());

        client.connect().await.unwrap();
        assert_eq!(client.connection_attempts(), 3);
        assert_eq!(connector.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_retries() {
        let connector = browser();
        connector.fail_next_opens(10).await;
        let client = client_for(&connector, McpConfig::default());

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { attempts: 3, .. }));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attempt_timeout() {
        let connector = browser().with_open_delay(Duration::from_secs(60));
        let config = McpConfig {
            max_retries: 1,
            ..McpConfig::default()
        };
        let client = client_for(&connector, config);

        let err = client.connect().await.unwrap_err();
        assert!(err.to_string().contains("timed out after 10s"));
    }

    #[tokio::test]
    async fn test_invoke_requires_connection() {
        let client = client_for(&browser(), McpConfig::default());
        let err = client
            .invoke("browser_navigate", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, McpError::NotConnected);
    }

    #[tokio::test]
    async fn test_invoke_sanitizes_arguments() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let result = client
            .invoke(
                "browser_navigate",
                json!({"url": "https://example.com", "__proto__": {"polluted": true}}),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "navigated");

        let calls = connector.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, json!({"url": "https://example.com"}));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_attempted_and_reported() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let result = client.invoke("browser_fly", json!({})).await.unwrap();
        assert!(result.is_error);
        assert!(result
            .text_content()
            .starts_with("Error calling tool browser_fly:"));
        assert_eq!(connector.calls().await[0].0, "browser_fly");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_may_have_completed() {
        let connector = browser().with_delayed_tool("browser_wait_for", Duration::from_secs(45), "done");
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let result = client.invoke("browser_wait_for", json!({"time": 45})).await.unwrap();
        assert!(!result.is_error);
        assert!(result.timed_out);
        assert_eq!(
            result.text_content(),
            "Tool browser_wait_for timed out but may have completed successfully."
        );
    }

    /// Forwards to an in-memory server but never delivers `tools/call`.
    struct StalledCalls(MemoryConnector);

    struct StalledOutbound(Arc<dyn Outbound>);

    #[async_trait::async_trait]
    impl Connector for StalledCalls {
        async fn open(&self, endpoint: &str) -> Result<Connection, McpError> {
            let connection = self.0.open(endpoint).await?;
            Ok(Connection {
                outbound: Arc::new(StalledOutbound(connection.outbound)),
                inbound: connection.inbound,
            })
        }
    }

    #[async_trait::async_trait]
    impl Outbound for StalledOutbound {
        async fn send(&self, message: Value) -> Result<(), McpError> {
            if message["method"] == "tools/call" {
                futures::future::pending::<()>().await;
            }
            self.0.send(message).await
        }

        async fn close(&self) {
            self.0.close().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_delivery_is_bounded_by_call_timeout() {
        let client = Arc::new(
            McpClient::new(ENDPOINT, McpConfig::default(), Arc::new(StalledCalls(browser())))
                .unwrap(),
        );
        client.connect().await.unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(120),
            client.invoke("browser_navigate", json!({})),
        )
        .await
        .expect("invoke must finish within the call timeout")
        .unwrap();

        assert!(result.timed_out);
        assert!(!result.is_error);
        assert!(started.elapsed() <= Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_in_flight_calls() {
        let connector = MemoryConnector::new().with_delayed_tool(
            "browser_wait_for",
            Duration::from_secs(25),
            "done",
        );
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let started = Instant::now();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.invoke("browser_wait_for", json!({"time": 25})).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.disconnect().await;

        let result = call.await.unwrap().unwrap();
        assert!(result.is_error);
        assert!(!result.timed_out);
        assert!(result
            .text_content()
            .starts_with("Error calling tool browser_wait_for:"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_rpc_timeout_error_is_classified() {
        let connector = MemoryConnector::new().with_tool(
            ToolCatalogEntry::new("slow", None, None),
            |_| {
                async {
                    Err(JsonRpcError {
                        code: -32001,
                        message: "Request timed out".into(),
                        data: None,
                    })
                }
                .boxed()
            },
        );
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let result = client.invoke("slow", json!({})).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_invokes_do_not_cross_talk() {
        let connector = MemoryConnector::new()
            .with_delayed_tool("slow", Duration::from_millis(300), "slow result")
            .with_delayed_tool("fast", Duration::from_millis(10), "fast result");
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        let (slow, fast) = tokio::join!(
            client.invoke("slow", json!({})),
            client.invoke("fast", json!({}))
        );
        assert_eq!(slow.unwrap().text_content(), "slow result");
        assert_eq!(fast.unwrap().text_content(), "fast result");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_connection_loss() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        connector.drop_connections().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.state().await, ConnectionState::Degraded);

        // cooldown (2s) then the rest of the 5s minimum interval
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(client.is_connected().await);
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_cycles() {
        let connector = browser();
        let config = McpConfig {
            max_retries: 1,
            max_reconnect_attempts: 2,
            ..McpConfig::default()
        };
        let client = client_for(&connector, config);
        client.connect().await.unwrap();

        connector.fail_next_opens(100).await;
        connector.drop_connections().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(client.state().await, ConnectionState::Disconnected);
        // initial connect + two reconnection cycles of one attempt each
        assert_eq!(connector.open_count(), 3);
    }

    #[tokio::test]
    async fn test_list_changed_notification_refreshes_catalog() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        connector
            .set_tools(vec![ToolCatalogEntry::new("browser_click", Some("Click"), None)])
            .await;
        connector.notify(TOOLS_LIST_CHANGED).await;

        for _ in 0..50 {
            if client.tools().await.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let tools = client.tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "browser_click");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = browser();
        let client = client_for(&connector, McpConfig::default());
        client.connect().await.unwrap();

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert!(client.tools().await.is_empty());
        assert_eq!(
            client.invoke("browser_navigate", json!({})).await.unwrap_err(),
            McpError::NotConnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_tracking() {
        let client = client_for(&browser(), McpConfig::default());
        client.touch();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(client.idle_for() >= Duration::from_secs(90));
        client.touch();
        assert!(client.idle_for() < Duration::from_secs(1));
    }
}
