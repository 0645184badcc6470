//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use mcpdrive::agent::{Orchestrator, ProgressEvent, Subscription};
use mcpdrive::config::Config;
use mcpdrive::error::{DriveError, Result};
use mcpdrive::mcp::{ClientRegistry, MemoryConnector};
use mcpdrive::providers::{ModelProvider, ModelRequest, ModelResponse};
use mcpdrive::session::{ContentPart, MessageStore, ProgressRecord};

pub const ENDPOINT: &str = "http://browser.test:8931/sse";

/// Model provider replaying a fixed list of responses.
///
/// Once the script runs out it answers "done".
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: DriveError) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_response("done")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Store recording every handoff.
#[derive(Default)]
pub struct RecordingStore {
    pub stored: Mutex<Vec<(String, String, Option<ProgressRecord>)>>,
    pub fail: bool,
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn store_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        progress: Option<ProgressRecord>,
    ) -> Result<()> {
        self.stored
            .lock()
            .unwrap()
            .push((chat_id.to_string(), content.to_string(), progress));
        if self.fail {
            return Err(DriveError::Session("disk full".into()));
        }
        Ok(())
    }
}

pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse::from_parts(vec![ContentPart::text(text)])
}

pub fn tool_use(id: &str, name: &str, input: Value) -> ContentPart {
    ContentPart::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}

pub fn tool_response(parts: Vec<ContentPart>) -> ModelResponse {
    ModelResponse::from_parts(parts)
}

pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    connector: &MemoryConnector,
) -> (Orchestrator, ClientRegistry) {
    let config = Config::default();
    let registry =
        ClientRegistry::with_connector(config.mcp.clone(), Arc::new(connector.clone()));
    (Orchestrator::new(provider, registry.clone(), &config), registry)
}

/// Drain whatever events are queued on a subscription.
pub fn drain(subscription: &mut Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

/// The `tool_result` parts of the last user message of a request.
pub fn last_tool_results(request: &ModelRequest) -> Vec<(String, String, bool)> {
    let last = request.messages.last().expect("request has messages");
    last.parts()
        .iter()
        .filter_map(|part| match part {
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((
                tool_use_id.clone(),
                mcpdrive::session::extract_text(content),
                *is_error,
            )),
            _ => None,
        })
        .collect()
}
