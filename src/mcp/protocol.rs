//! MCP wire types
//!
//! JSON-RPC 2.0 envelopes plus the subset of Model Context Protocol payloads
//! this client speaks: the `initialize` handshake, `tools/list` and
//! `tools/call`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::McpError;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version sent during `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported to servers
pub const CLIENT_NAME: &str = "mcpdrive";

/// Server notification announcing a changed tool catalog
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// Keys removed from tool arguments before they leave the process.
const FORBIDDEN_ARGUMENT_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

// =============================================================================
// JSON-RPC envelopes
// =============================================================================

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// A message received from the server, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests
    Response {
        id: u64,
        result: std::result::Result<Value, JsonRpcError>,
    },
    /// Server-initiated request expecting an answer (e.g. `ping`)
    Request { id: Value, method: String },
    /// Server-initiated notification
    Notification { method: String },
    /// Anything else, including responses with ids we never issued
    Unrecognized,
}

impl Incoming {
    /// Classify a raw JSON-RPC message.
    pub fn classify(message: &Value) -> Self {
        let method = message.get("method").and_then(Value::as_str);
        let id = message.get("id").filter(|id| !id.is_null());

        match (method, id) {
            (Some(method), Some(id)) => Incoming::Request {
                id: id.clone(),
                method: method.to_string(),
            },
            (Some(method), None) => Incoming::Notification {
                method: method.to_string(),
            },
            (None, Some(id)) => {
                let Some(id) = request_id(id) else {
                    return Incoming::Unrecognized;
                };
                let result = match message.get("error") {
                    Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or(
                        JsonRpcError {
                            code: -32603,
                            message: error.to_string(),
                            data: None,
                        },
                    )),
                    None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                Incoming::Response { id, result }
            }
            (None, None) => Incoming::Unrecognized,
        }
    }
}

/// Our ids are numeric; some servers echo them back as strings.
fn request_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(num) => num.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Parameters for the `initialize` request.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true }
        },
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

// =============================================================================
// Tool catalog
// =============================================================================

/// One tool advertised by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolCatalogEntry {
    /// Build an entry, filling in the defaults servers are allowed to omit.
    pub fn new(name: &str, description: Option<&str>, input_schema: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            description: description
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Tool: {}", name)),
            input_schema: input_schema
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolsPage {
    #[serde(default)]
    tools: Vec<RawTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// One page of a `tools/list` result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolsPage {
    pub tools: Vec<ToolCatalogEntry>,
    pub next_cursor: Option<String>,
}

impl ToolsPage {
    /// Parse a `tools/list` result.
    pub fn parse(result: Value) -> std::result::Result<Self, McpError> {
        let raw: RawToolsPage = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("invalid tools/list result: {}", e)))?;
        Ok(Self {
            tools: raw
                .tools
                .into_iter()
                .map(|t| ToolCatalogEntry::new(&t.name, t.description.as_deref(), t.input_schema))
                .collect(),
            next_cursor: raw.next_cursor.filter(|c| !c.is_empty()),
        })
    }
}

// =============================================================================
// Tool results
// =============================================================================

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }

    pub fn image(data: impl Into<String>, mime_type: &str) -> Self {
        Self {
            kind: "image".into(),
            text: None,
            data: Some(data.into()),
            mime_type: Some(mime_type.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
    /// Set locally when the call hit its deadline; never on the wire.
    #[serde(skip)]
    pub timed_out: bool,
}

impl CallToolResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
            timed_out: false,
        }
    }

    /// An error-flagged single-text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: true,
            timed_out: false,
        }
    }

    /// The "may have completed" result returned when a call exceeds its
    /// deadline. Not error-flagged.
    pub fn timed_out(tool_name: &str) -> Self {
        Self {
            content: vec![ToolContent::text(format!(
                "Tool {} timed out but may have completed successfully.",
                tool_name
            ))],
            is_error: false,
            timed_out: true,
        }
    }

    /// Text blocks joined with newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Drop prototype-pollution-style keys from tool arguments, recursively.
///
/// `null` arguments become an empty object.
///
/// # Example
/// ```
/// use mcpdrive::mcp::sanitize_arguments;
/// use serde_json::json;
///
/// let clean = sanitize_arguments(json!({"url": "x", "__proto__": {"admin": true}}));
/// assert_eq!(clean, json!({"url": "x"}));
/// ```
pub fn sanitize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Null => Value::Object(Map::new()),
        other => strip_forbidden_keys(other),
    }
}

fn strip_forbidden_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !FORBIDDEN_ARGUMENT_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k, strip_forbidden_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_forbidden_keys).collect()),
        other => other,
    }
}

/// Validate an endpoint and give it an explicit scheme.
///
/// Endpoints without a scheme are assumed to be plain `http://`.
pub fn normalize_endpoint(endpoint: &str) -> std::result::Result<String, McpError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(McpError::InvalidEndpoint("empty endpoint".into()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let url = reqwest::Url::parse(&candidate)
        .map_err(|e| McpError::InvalidEndpoint(format!("{}: {}", trimmed, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(McpError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                other, trimmed
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(McpError::InvalidEndpoint(format!("missing host in {}", trimmed)));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}));
    }

    #[test]
    fn test_classify_response_and_error() {
        let ok = Incoming::classify(&json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": []}}));
        assert_eq!(
            ok,
            Incoming::Response {
                id: 3,
                result: Ok(json!({"tools": []}))
            }
        );

        let err = Incoming::classify(&json!({
            "jsonrpc": "2.0", "id": "4",
            "error": {"code": -32001, "message": "Request timed out"}
        }));
        match err {
            Incoming::Response { id, result: Err(e) } => {
                assert_eq!(id, 4);
                assert!(McpError::from(e).is_timeout());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_server_messages() {
        assert_eq!(
            Incoming::classify(&json!({"jsonrpc": "2.0", "method": TOOLS_LIST_CHANGED})),
            Incoming::Notification {
                method: TOOLS_LIST_CHANGED.into()
            }
        );
        assert!(matches!(
            Incoming::classify(&json!({"jsonrpc": "2.0", "id": "s1", "method": "ping"})),
            Incoming::Request { method, .. } if method == "ping"
        ));
        assert_eq!(Incoming::classify(&json!({"hello": 1})), Incoming::Unrecognized);
    }

    #[test]
    fn test_tools_page_defaults() {
        let page = ToolsPage::parse(json!({
            "tools": [
                {"name": "browser_navigate", "description": "Go", "inputSchema": {"type": "object", "required": ["url"]}},
                {"name": "browser_snapshot"}
            ],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(page.tools[0].input_schema["required"][0], "url");
        assert_eq!(page.tools[1].description, "Tool: browser_snapshot");
        assert_eq!(page.tools[1].input_schema, json!({"type": "object", "properties": {}}));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));

        assert!(ToolsPage::parse(json!({"tools": "nope"})).is_err());
    }

    #[test]
    fn test_call_tool_result_parsing() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert!(!result.timed_out);
        assert_eq!(result.text_content(), "line one\nline two");
        assert_eq!(result.content[1].mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_timed_out_result_is_not_error() {
        let result = CallToolResult::timed_out("browser_click");
        assert!(!result.is_error);
        assert!(result.timed_out);
        assert!(result.text_content().contains("may have completed"));
    }

    #[test]
    fn test_sanitize_arguments_nested() {
        let clean = sanitize_arguments(json!({
            "constructor": 1,
            "options": {"prototype": {}, "keep": [ {"__proto__": 1, "x": 2} ]}
        }));
        assert_eq!(clean, json!({"options": {"keep": [ {"x": 2} ]}}));
        assert_eq!(sanitize_arguments(Value::Null), json!({}));
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("localhost:8931/sse").unwrap(),
            "http://localhost:8931/sse"
        );
        assert_eq!(
            normalize_endpoint(" https://mcp.example.com/sse ").unwrap(),
            "https://mcp.example.com/sse"
        );
        assert!(matches!(
            normalize_endpoint(""),
            Err(McpError::InvalidEndpoint(_))
        ));
        assert!(normalize_endpoint("ftp://example.com").is_err());
    }
}
