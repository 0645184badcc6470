//! MCP transports
//!
//! A [`Connector`] opens a bidirectional message channel to an endpoint: an
//! [`Outbound`] half for sending JSON-RPC messages and an inbound receiver of
//! server messages. The inbound receiver closing means the connection is gone.
//!
//! [`SseConnector`] implements the HTTP+SSE transport: the client holds a
//! `GET` event stream open, the server announces a POST URL with an
//! `endpoint` event, and answers arrive as `message` events.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::McpError;

/// Inbound queue depth per connection.
const INBOUND_CAPACITY: usize = 64;

/// Sending half of an open connection.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver one JSON-RPC message to the server.
    async fn send(&self, message: Value) -> Result<(), McpError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// An open connection.
pub struct Connection {
    pub outbound: Arc<dyn Outbound>,
    pub inbound: mpsc::Receiver<Value>,
}

/// Opens connections to tool-provider endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Connection, McpError>;
}

// ============================================================================
// SSE event parsing
// ============================================================================

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Feed it raw chunks as they arrive; complete events come out once their
/// terminating blank line has been seen. Bytes are buffered until a full line
/// is available, so multi-byte characters may straddle chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    line_buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        self.line_buffer.extend_from_slice(chunk.as_ref());
        let mut events = Vec::new();

        while let Some(newline_pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.line_buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos])
                .trim_end_matches('\r')
                .to_string();

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

// ============================================================================
// HTTP+SSE connector
// ============================================================================

/// HTTP+SSE transport over reqwest.
#[derive(Clone)]
pub struct SseConnector {
    client: Client,
}

impl SseConnector {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Use a custom HTTP client. Do not set a total request timeout on it: the
    /// event stream stays open for the life of the connection.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for SseConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn open(&self, endpoint: &str) -> Result<Connection, McpError> {
        let base = Url::parse(endpoint).map_err(|e| McpError::InvalidEndpoint(e.to_string()))?;

        let response = self
            .client
            .get(base.clone())
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "event stream request returned HTTP {}",
                response.status()
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(INBOUND_CAPACITY);
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let byte_stream = response.bytes_stream();

        let reader = tokio::spawn(async move {
            let mut parser = SseParser::new();
            let mut endpoint_tx = Some(endpoint_tx);
            tokio::pin!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "MCP event stream read error");
                        return;
                    }
                };

                for event in parser.feed(&chunk) {
                    match event.event.as_str() {
                        "endpoint" => {
                            if let Some(tx) = endpoint_tx.take() {
                                let _ = tx.send(event.data);
                            }
                        }
                        "message" => match serde_json::from_str::<Value>(&event.data) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => debug!(error = %e, "Ignoring non-JSON MCP message"),
                        },
                        other => debug!(event = other, "Ignoring SSE event"),
                    }
                }
            }
            debug!("MCP event stream ended");
        });

        let post_path = match endpoint_rx.await {
            Ok(path) => path,
            Err(_) => {
                reader.abort();
                return Err(McpError::Protocol(
                    "event stream ended before the server announced its endpoint".into(),
                ));
            }
        };
        let post_url = match base.join(post_path.trim()) {
            Ok(url) => url,
            Err(e) => {
                reader.abort();
                return Err(McpError::Protocol(format!(
                    "invalid endpoint event '{}': {}",
                    post_path, e
                )));
            }
        };
        debug!(post_url = %post_url, "MCP session endpoint announced");

        Ok(Connection {
            outbound: Arc::new(SseOutbound {
                client: self.client.clone(),
                post_url,
                reader,
            }),
            inbound: inbound_rx,
        })
    }
}

struct SseOutbound {
    client: Client,
    post_url: Url,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Outbound for SseOutbound {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let response = self
            .client
            .post(self.post_url.clone())
            .json(&message)
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {}: {}", status, body)));
        }
        Ok(())
    }

    async fn close(&self) {
        self.reader.abort();
    }
}

impl Drop for SseOutbound {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
