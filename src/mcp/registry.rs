//! Client registry
//!
//! Caches one connected [`McpClient`] per endpoint so concurrent
//! conversations share a connection. Concurrent first use of an endpoint
//! joins a single in-flight connect instead of dialing once per caller.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::client::McpClient;
use super::protocol::normalize_endpoint;
use super::transport::{Connector, SseConnector};
use crate::config::McpConfig;
use crate::error::McpError;
use crate::log_component;

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<McpClient>, McpError>>>;

#[derive(Default)]
struct RegistryState {
    clients: HashMap<String, Arc<McpClient>>,
    inflight: HashMap<String, ConnectFuture>,
}

struct RegistryInner {
    config: McpConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<RegistryState>,
    sweeper: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

/// Health of one endpoint as seen through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub connected: bool,
    pub tools_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Endpoint-keyed cache of protocol clients.
///
/// Cheap to clone; clones share the cache. Construct one per process (or per
/// test) and pass it to whoever needs clients. The first [`get`](Self::get)
/// starts a background sweep that evicts idle clients every
/// `eviction_sweep_secs`; it stops when the last clone is dropped.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl ClientRegistry {
    /// Registry dialing over HTTP+SSE.
    pub fn new(config: McpConfig) -> Self {
        Self::with_connector(config, Arc::new(SseConnector::new()))
    }

    pub fn with_connector(config: McpConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connector,
                state: Mutex::new(RegistryState::default()),
                sweeper: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &McpConfig {
        &self.inner.config
    }

    /// Return a connected client for `endpoint`, connecting if needed.
    ///
    /// A cached client that is no longer connected is disconnected and
    /// replaced.
    pub async fn get(&self, endpoint: &str) -> Result<Arc<McpClient>, McpError> {
        let key = normalize_endpoint(endpoint)?;
        self.ensure_sweeper();

        let (connect, stale) = {
            let mut state = self.inner.state.lock().await;

            let mut stale = None;
            if let Some(client) = state.clients.get(&key).cloned() {
                if client.is_connected().await {
                    client.touch();
                    return Ok(client);
                }
                stale = state.clients.remove(&key);
            }

            let connect = match state.inflight.get(&key) {
                Some(pending) => {
                    debug!(endpoint = %key, "Joining in-flight MCP connect");
                    pending.clone()
                }
                None => {
                    let pending = self.connect_future(key.clone());
                    state.inflight.insert(key.clone(), pending.clone());
                    pending
                }
            };
            (connect, stale)
        };

        if let Some(stale) = stale {
            log_component!(info, "registry", "Replacing disconnected MCP client", endpoint = key.as_str());
            stale.disconnect().await;
        }

        connect.await
    }

    fn connect_future(&self, key: String) -> ConnectFuture {
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let config = self.inner.config.clone();
        let connector = self.inner.connector.clone();

        async move {
            let result = match McpClient::new(&key, config, connector) {
                Ok(client) => {
                    let client = Arc::new(client);
                    client.connect().await.map(|()| client)
                }
                Err(e) => Err(e),
            };

            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock().await;
                state.inflight.remove(&key);
                if let Ok(client) = &result {
                    state.clients.insert(key.clone(), client.clone());
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Number of cached clients that are currently connected.
    pub async fn len(&self) -> usize {
        let clients: Vec<Arc<McpClient>> = {
            let state = self.inner.state.lock().await;
            state.clients.values().cloned().collect()
        };
        let mut connected = 0;
        for client in clients {
            if client.is_connected().await {
                connected += 1;
            }
        }
        connected
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Disconnect and forget the client for `endpoint`, if any.
    pub async fn disconnect(&self, endpoint: &str) -> Result<(), McpError> {
        let key = normalize_endpoint(endpoint)?;
        let client = self.inner.state.lock().await.clients.remove(&key);
        if let Some(client) = client {
            client.disconnect().await;
        }
        Ok(())
    }

    /// Disconnect and forget every cached client.
    pub async fn disconnect_all(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let mut state = self.inner.state.lock().await;
            state.clients.drain().map(|(_, c)| c).collect()
        };
        for client in clients {
            client.disconnect().await;
        }
    }

    /// Disconnect and drop clients idle past the configured timeout, along
    /// with clients that gave up reconnecting. Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout();
        let mut evicted = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            let mut keys = Vec::new();
            for (key, client) in state.clients.iter() {
                let settled = client.state().await == super::ConnectionState::Disconnected;
                if settled || client.idle_for() >= idle_timeout {
                    keys.push(key.clone());
                }
            }
            for key in keys {
                if let Some(client) = state.clients.remove(&key) {
                    evicted.push((key, client));
                }
            }
        }

        for (key, client) in &evicted {
            log_component!(info, "registry", "Evicting idle MCP client", endpoint = key.as_str(), idle_secs = client.idle_for().as_secs());
            client.disconnect().await;
        }
        evicted.len()
    }

    /// Whether the idle sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the idle sweep once. A zero period disables it.
    fn ensure_sweeper(&self) {
        let period = self.inner.config.eviction_sweep();
        if period.is_zero() {
            return;
        }
        let mut slot = self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(self.spawn_sweeper(period));
        }
    }

    /// Run [`evict_idle`](Self::evict_idle) every `period` until the registry
    /// is dropped.
    fn spawn_sweeper(&self, period: std::time::Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let registry = ClientRegistry { inner };
                let evicted = registry.evict_idle().await;
                if evicted > 0 {
                    debug!(evicted, "Idle sweep finished");
                }
            }
        })
    }

    /// Report whether `endpoint` is reachable and how many tools it offers.
    /// Never fails; connection problems land in `error`.
    pub async fn health_check(&self, endpoint: &str) -> HealthStatus {
        match self.get(endpoint).await {
            Ok(client) => HealthStatus {
                connected: client.is_connected().await,
                tools_count: client.tools().await.len(),
                error: None,
            },
            Err(e) => HealthStatus {
                connected: false,
                tools_count: 0,
                error: Some(e.to_string()),
            },
        }
    }
}
