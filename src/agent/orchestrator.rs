//! Conversation orchestrator
//!
//! Drives one generation cycle: model call, tool fan-out through the MCP
//! client, results fed back, repeated until the model answers in plain text
//! or the iteration cap is reached.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::compaction::{compress_tool_result, trim_history};
use super::progress::{ProgressEvent, ProgressHandle};
use crate::config::{Config, OrchestratorConfig};
use crate::error::Result;
use crate::log_component;
use crate::mcp::{CallToolResult, ClientRegistry, McpClient};
use crate::providers::{ModelProvider, ModelRequest, ToolDefinition};
use crate::session::{
    ContentPart, ConversationMessage, MessageStore, ProgressRecord, Role, ToolInvocation,
};
use crate::utils::string::preview;

/// System instruction when MCP tools are available.
pub const AGENT_SYSTEM_PROMPT: &str = "You have access to external tools via MCP. Use the available tools to help accomplish tasks. Always wait a few seconds after actions that change page state to ensure they complete.";

/// System instruction when no tools are available.
pub const ASK_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. Answer questions and provide information, but you cannot perform actions or use external tools.";

/// Answer used when the model stops calling tools without saying anything.
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I completed the actions but couldn't generate a response.";

/// Answer used when the iteration cap is reached.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "I completed the available actions but reached the maximum number of iterations.";

/// Whether a cycle may use tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    /// Connect to the endpoint (if any) and let the model call its tools.
    #[default]
    Agent,
    /// Answer from the model alone; never connects.
    Ask,
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "ask" => Ok(Self::Ask),
            other => Err(format!("unknown mode '{}' (expected agent or ask)", other)),
        }
    }
}

/// Input of one generation cycle.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub chat_id: String,
    pub messages: Vec<ConversationMessage>,
    pub endpoint: Option<String>,
    pub mode: GenerationMode,
    /// Replaces the default system instruction when set.
    pub system: Option<String>,
}

impl GenerateRequest {
    pub fn new(chat_id: &str, messages: Vec<ConversationMessage>) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            messages,
            endpoint: None,
            mode: GenerationMode::Agent,
            system: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }
}

/// A tool use requested by the model.
struct ToolCall {
    id: String,
    name: String,
    input: Value,
}

enum Step {
    Skipped(ToolCall),
    Run { call: ToolCall, trace_index: usize },
}

/// Runs generation cycles against a model provider and MCP tools.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use mcpdrive::agent::{GenerateRequest, Orchestrator, ProgressHandle};
/// use mcpdrive::config::Config;
/// use mcpdrive::mcp::ClientRegistry;
/// use mcpdrive::providers::ClaudeProvider;
/// use mcpdrive::session::ConversationMessage;
///
/// let config = Config::load()?;
/// let provider = Arc::new(ClaudeProvider::from_config(&config.model)?);
/// let registry = ClientRegistry::new(config.mcp.clone());
/// let orchestrator = Orchestrator::new(provider, registry, &config);
///
/// let request = GenerateRequest::new("chat-1", vec![ConversationMessage::user("Open example.com")])
///     .with_endpoint("http://localhost:8931/sse");
/// let answer = orchestrator.generate(request, &ProgressHandle::noop()).await?;
/// ```
pub struct Orchestrator {
    provider: Arc<dyn ModelProvider>,
    registry: ClientRegistry,
    store: Option<Arc<dyn MessageStore>>,
    model: String,
    max_tokens: u32,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: ClientRegistry, config: &Config) -> Self {
        Self {
            provider,
            registry,
            store: None,
            model: config.model.model.clone(),
            max_tokens: config.model.max_tokens,
            config: config.orchestrator.clone(),
        }
    }

    /// Hand every final answer and its progress record to `store`.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Run one generation cycle and return the final assistant text.
    ///
    /// # Errors
    /// Only model service failures are returned. Connection failures mean the
    /// cycle runs without tools; tool failures are fed back to the model; a
    /// failure to persist the answer is logged.
    pub async fn generate(&self, request: GenerateRequest, progress: &ProgressHandle) -> Result<String> {
        let span = info_span!(
            "generate",
            chat_id = %request.chat_id,
            iteration_cap = self.config.max_iterations
        );
        self.run_cycle(request, progress).instrument(span).await
    }

    async fn run_cycle(&self, request: GenerateRequest, progress: &ProgressHandle) -> Result<String> {
        let started = Instant::now();
        let client = self.acquire_client(&request).await;

        let system = match (&request.system, &client) {
            (Some(system), _) => system.clone(),
            (None, Some(_)) => AGENT_SYSTEM_PROMPT.to_string(),
            (None, None) => ASK_SYSTEM_PROMPT.to_string(),
        };

        let mut conversation = request.messages;
        let mut trace: Vec<ToolInvocation> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            conversation = trim_history(conversation, self.config.token_budget);
            progress.emit(ProgressEvent::IterationStart { iteration });

            let tools: Vec<ToolDefinition> = match &client {
                Some(client) => client.tools().await.iter().map(ToolDefinition::from).collect(),
                None => Vec::new(),
            };
            let model_request = ModelRequest {
                model: self.model.clone(),
                max_tokens: self.max_tokens,
                messages: conversation.clone(),
                system: (iteration == 1).then(|| system.clone()),
                tools,
            };

            debug!(iteration, messages = model_request.messages.len(), "Calling model");
            let response = self.provider.create_message(&model_request).await?;

            // Tool uses without a client have nothing to run on; treat the
            // turn as final.
            let tool_client = match (&client, response.has_tool_uses()) {
                (Some(client), true) => client.clone(),
                _ => {
                    let text = response.text();
                    let answer = if text.trim().is_empty() {
                        EMPTY_RESPONSE_FALLBACK.to_string()
                    } else {
                        text
                    };
                    info!(iterations = iteration, "Generation finished");
                    return Ok(self
                        .finish(&request.chat_id, answer, trace, iteration, started, progress)
                        .await);
                }
            };

            let parts: Vec<ContentPart> = response
                .content
                .into_iter()
                .filter(|p| !matches!(p, ContentPart::Unsupported))
                .collect();
            let calls: Vec<ToolCall> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();
            conversation.push(ConversationMessage::with_parts(Role::Assistant, parts));

            let results = self
                .run_tools(&tool_client, calls, &mut trace, progress)
                .await;
            conversation.push(ConversationMessage::with_parts(Role::User, results));
        }

        info!(
            iterations = self.config.max_iterations,
            "Tool loop reached maximum iterations"
        );
        Ok(self
            .finish(
                &request.chat_id,
                MAX_ITERATIONS_MESSAGE.to_string(),
                trace,
                self.config.max_iterations,
                started,
                progress,
            )
            .await)
    }

    async fn acquire_client(&self, request: &GenerateRequest) -> Option<Arc<McpClient>> {
        if request.mode == GenerationMode::Ask {
            return None;
        }
        let endpoint = request.endpoint.as_deref()?;
        match self.registry.get(endpoint).await {
            Ok(client) => Some(client),
            Err(e) => {
                let error = e.to_string();
                log_component!(warn, "agent", "MCP connection failed, continuing without tools", endpoint = endpoint, error = error.as_str());
                None
            }
        }
    }

    /// Execute one iteration's tool uses and return the tool result parts in
    /// request order. Repeats within the iteration are skipped.
    async fn run_tools(
        &self,
        client: &McpClient,
        calls: Vec<ToolCall>,
        trace: &mut Vec<ToolInvocation>,
        progress: &ProgressHandle,
    ) -> Vec<ContentPart> {
        let mut executed: HashSet<String> = HashSet::new();
        let mut steps = Vec::with_capacity(calls.len());
        for call in calls {
            let description = describe_step(&call.name, &call.input);
            if !executed.insert(dedup_key(&call.name, &call.input)) {
                debug!(tool = %call.name, id = %call.id, "Skipping duplicate tool call");
                let mut invocation = ToolInvocation::start(
                    &call.id,
                    &call.name,
                    format!("{} (skipped duplicate)", description),
                    call.input.clone(),
                );
                invocation.complete();
                trace.push(invocation);
                steps.push(Step::Skipped(call));
                continue;
            }

            trace.push(ToolInvocation::start(
                &call.id,
                &call.name,
                description,
                call.input.clone(),
            ));
            progress.emit(ProgressEvent::ToolStart {
                tool_id: call.id.clone(),
                tool_name: call.name.clone(),
                params: call.input.clone(),
            });
            steps.push(Step::Run {
                call,
                trace_index: trace.len() - 1,
            });
        }

        let outcomes = join_all(steps.iter().map(|step| async move {
            match step {
                Step::Skipped(_) => None,
                Step::Run { call, .. } => Some(call_tool(client, call, progress).await),
            }
        }))
        .await;

        let max_chars = self.config.max_tool_result_chars;
        steps
            .into_iter()
            .zip(outcomes)
            .map(|(step, outcome)| match (step, outcome) {
                (Step::Run { call, trace_index }, Some(result)) => {
                    if let Some(invocation) = trace.get_mut(trace_index) {
                        if result.is_error || result.timed_out {
                            invocation.fail(result.text_content());
                        } else {
                            invocation.complete();
                        }
                    }
                    ContentPart::ToolResult {
                        tool_use_id: call.id,
                        content: compress_tool_result(&result, max_chars),
                        is_error: result.is_error,
                    }
                }
                (Step::Skipped(call), _) | (Step::Run { call, .. }, None) => {
                    ContentPart::tool_result(
                        &call.id,
                        format!("Skipped duplicate call to {}", call.name),
                        false,
                    )
                }
            })
            .collect()
    }

    async fn finish(
        &self,
        chat_id: &str,
        answer: String,
        trace: Vec<ToolInvocation>,
        iterations: u32,
        started: Instant,
        progress: &ProgressHandle,
    ) -> String {
        progress.emit(ProgressEvent::AiComplete { iterations });

        let record = ProgressRecord::new(trace, iterations, started.elapsed().as_millis() as u64);
        if let Some(store) = &self.store {
            if let Err(e) = store
                .store_assistant_message(chat_id, &answer, Some(record))
                .await
            {
                warn!(chat_id, error = %e, "Failed to store assistant message");
            }
        }
        answer
    }
}

async fn call_tool(client: &McpClient, call: &ToolCall, progress: &ProgressHandle) -> CallToolResult {
    let tool_start = Instant::now();
    let result = client
        .invoke(&call.name, call.input.clone())
        .await
        .unwrap_or_else(|e| CallToolResult::error(format!("Error calling tool {}: {}", call.name, e)));
    let latency_ms = tool_start.elapsed().as_millis() as u64;

    if result.is_error || result.timed_out {
        let error = result.text_content();
        warn!(
            tool = %call.name,
            id = %call.id,
            latency_ms,
            timed_out = result.timed_out,
            error = %preview(&error, 200),
            "Tool call failed"
        );
        progress.emit(ProgressEvent::ToolError {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
            error,
        });
    } else {
        info!(tool = %call.name, id = %call.id, latency_ms, "Tool call completed");
        progress.emit(ProgressEvent::ToolComplete {
            tool_id: call.id.clone(),
            tool_name: call.name.clone(),
        });
    }
    result
}

/// Key identifying a tool call by name and arguments, insensitive to the
/// order of object keys.
pub fn dedup_key(name: &str, arguments: &Value) -> String {
    let mut key = String::from(name);
    key.push(':');
    write_canonical(arguments, &mut key);
    key
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Human-readable summary of a tool call for the progress trace.
pub fn describe_step(name: &str, arguments: &Value) -> String {
    let arg = |key: &str| match arguments.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    match name {
        "browser_navigate" => format!("Navigating to {}", arg("url")),
        "browser_click" => format!("Clicking {}", arg("element")),
        "browser_type" => format!("Typing \"{}\"", arg("text")),
        "browser_snapshot" => "Analyzing page structure".to_string(),
        "browser_take_screenshot" => "Capturing page screenshot".to_string(),
        "browser_wait_for" => format!("Waiting {} seconds", arg("time")),
        other => format!("Executing {}", other),
    }
}
