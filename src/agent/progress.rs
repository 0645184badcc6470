//! Progress events for a running generation cycle.
//!
//! A [`ProgressEmitter`] maps each conversation id to at most one live
//! listener. The UI-facing side subscribes; the orchestrator only emits,
//! through a [`ProgressHandle`] it receives per call. Events for a
//! conversation nobody is watching are dropped.
//!
//! # Example
//!
//! ```
//! use mcpdrive::agent::{ProgressEmitter, ProgressEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let emitter = ProgressEmitter::new();
//!     let mut sub = emitter.subscribe("chat-1");
//!
//!     emitter.handle("chat-1").emit(ProgressEvent::IterationStart { iteration: 1 });
//!
//!     assert!(matches!(sub.recv().await, Some(ProgressEvent::Connected { .. })));
//!     assert_eq!(sub.recv().await, Some(ProgressEvent::IterationStart { iteration: 1 }));
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One lifecycle event of a generation cycle, serialized as
/// `{"type": "tool_start", "toolId": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Connected { chat_id: String },
    IterationStart { iteration: u32 },
    #[serde(rename_all = "camelCase")]
    ToolStart {
        tool_id: String,
        tool_name: String,
        params: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolComplete { tool_id: String, tool_name: String },
    #[serde(rename_all = "camelCase")]
    ToolError {
        tool_id: String,
        tool_name: String,
        error: String,
    },
    AiComplete { iterations: u32 },
}

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct ListenerTable {
    listeners: Mutex<HashMap<String, Listener>>,
    next_id: AtomicU64,
}

impl ListenerTable {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-conversation listener table.
///
/// Cheap to clone; clones share listeners.
#[derive(Clone, Default)]
pub struct ProgressEmitter {
    table: Arc<ListenerTable>,
}

impl ProgressEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `chat_id`, replacing any previous one.
    ///
    /// The new listener immediately receives a `connected` event. A replaced
    /// listener's stream ends.
    pub fn subscribe(&self, chat_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.table.next_id.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(ProgressEvent::Connected {
            chat_id: chat_id.to_string(),
        });

        let replaced = self
            .table
            .lock()
            .insert(chat_id.to_string(), Listener { id, tx });
        if replaced.is_some() {
            debug!(chat_id, "Replaced progress listener");
        }

        Subscription {
            chat_id: chat_id.to_string(),
            id,
            rx,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Remove the listener for `chat_id`, if any.
    pub fn unsubscribe(&self, chat_id: &str) {
        self.table.lock().remove(chat_id);
    }

    /// Deliver `event` to the listener of `chat_id`. No-op without one.
    pub fn emit(&self, chat_id: &str, event: ProgressEvent) {
        let mut listeners = self.table.lock();
        let closed = match listeners.get(chat_id) {
            Some(listener) => listener.tx.send(event).is_err(),
            None => false,
        };
        if closed {
            listeners.remove(chat_id);
        }
    }

    pub fn has_listener(&self, chat_id: &str) -> bool {
        self.table.lock().contains_key(chat_id)
    }

    /// Emit handle bound to one conversation.
    pub fn handle(&self, chat_id: &str) -> ProgressHandle {
        ProgressHandle {
            target: Some((self.clone(), chat_id.to_string())),
        }
    }
}

/// A live listener registration. Dropping it unregisters the listener.
pub struct Subscription {
    chat_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    table: std::sync::Weak<ListenerTable>,
}

impl Subscription {
    /// Next event; `None` once the listener was replaced or removed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let mut listeners = table.lock();
            // Only remove our own registration, not a newer one.
            if listeners.get(&self.chat_id).map(|l| l.id) == Some(self.id) {
                listeners.remove(&self.chat_id);
            }
        }
    }
}

/// Where the orchestrator sends progress for one cycle.
#[derive(Clone, Default)]
pub struct ProgressHandle {
    target: Option<(ProgressEmitter, String)>,
}

impl ProgressHandle {
    /// A handle that drops every event.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some((emitter, chat_id)) = &self.target {
            emitter.emit(chat_id, event);
        }
    }
}
