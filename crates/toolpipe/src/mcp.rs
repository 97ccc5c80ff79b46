use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::context::ToolContext;
use crate::error::Error;
use crate::tool::{validate_tool_input, Tool, ToolResult, ToolReturn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// --- JSON-RPC types ---

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    id: u64,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification {
    jsonrpc: &'static str,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// --- MCP wire types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpToolDef {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct McpToolsListResult {
    tools: Vec<McpToolDef>,
}

#[derive(Debug, Deserialize)]
struct McpContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct McpWireResult {
    content: Vec<McpContent>,
    #[serde(default)]
    is_error: bool,
}

/// Outcome of one remote tool call, already flattened to text.
#[derive(Debug, Clone)]
pub struct McpCallResult {
    pub content: String,
    pub is_error: bool,
    pub metadata: Map<String, Value>,
}

impl From<McpWireResult> for McpCallResult {
    fn from(wire: McpWireResult) -> Self {
        let skipped = wire.content.iter().filter(|c| c.content_type != "text").count();
        let content: String = wire
            .content
            .iter()
            .filter_map(|c| {
                if c.content_type == "text" {
                    c.text.as_deref()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut metadata = Map::new();
        if skipped > 0 {
            metadata.insert("skipped_content".into(), json!(skipped));
        }
        Self { content, is_error: wire.is_error, metadata }
    }
}

// --- Pure helpers ---

/// Parse all SSE data payloads from a `text/event-stream` body. Multi-line
/// `data:` fields are joined per the SSE spec.
fn extract_sse_events(body: &str) -> Result<Vec<String>, Error> {
    let mut events: Vec<String> = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            // Blank line ends the event.
            if !current_lines.is_empty() {
                events.push(current_lines.join("\n"));
                current_lines.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            // SSE spec: strip at most one leading space after the colon.
            let data = rest.strip_prefix(' ').unwrap_or(rest);
            current_lines.push(data);
        }
    }

    if !current_lines.is_empty() {
        events.push(current_lines.join("\n"));
    }

    if events.is_empty() {
        return Err(Error::Mcp("no data field in SSE response".into()));
    }
    Ok(events)
}

/// Locate the JSON-RPC response matching `expected_id` among SSE payloads.
/// Falls back to the last payload for servers that omit or null the id in
/// error responses.
fn find_rpc_response(events: &[String], expected_id: u64) -> Result<String, Error> {
    for event in events {
        if let Ok(value) = serde_json::from_str::<Value>(event)
            && value.get("id").and_then(|v| v.as_u64()) == Some(expected_id)
        {
            return Ok(event.clone());
        }
    }
    events
        .last()
        .cloned()
        .ok_or_else(|| Error::Mcp("no events in SSE response".into()))
}

/// MCP servers expect `arguments` to be an object, never null. Models
/// sometimes send null for tools without required parameters.
fn normalize_arguments(arguments: Value) -> Value {
    if arguments.is_null() {
        json!({})
    } else {
        arguments
    }
}

// --- Transport ---

/// Wire-level access to one MCP server.
pub trait McpTransport: Send + Sync {
    fn call_tool<'a>(
        &'a self,
        tool: &'a str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<McpCallResult, Error>> + Send + 'a>>;
}

/// Streamable-HTTP transport speaking JSON-RPC 2.0, with SSE response
/// bodies and `Mcp-Session-Id` tracking.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
    auth_header: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(0),
            auth_header: None,
        })
    }

    /// Attach an `Authorization` header value, e.g. `"Bearer <token>"`.
    pub fn with_auth(mut self, auth_header: impl Into<String>) -> Self {
        self.auth_header = Some(auth_header.into());
        self
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn read_session_id(&self) -> Result<Option<String>, Error> {
        Ok(self
            .session_id
            .read()
            .map_err(|e| Error::Mcp(format!("session lock poisoned: {e}")))?
            .clone())
    }

    /// Capture the session id from a response header when the server sets
    /// or rotates one.
    fn update_session_id(&self, response: &reqwest::Response) -> Result<(), Error> {
        if let Some(new_sid) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            *self
                .session_id
                .write()
                .map_err(|e| Error::Mcp(format!("session lock poisoned: {e}")))? =
                Some(new_sid.to_string());
        }
        Ok(())
    }

    async fn rpc(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let id = self.next_id();
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(&request);

        if let Some(sid) = self.read_session_id()? {
            builder = builder.header("Mcp-Session-Id", sid);
        }
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await?;
        self.update_session_id(&response)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Mcp(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let json_str = if content_type.contains("text/event-stream") {
            let events = extract_sse_events(&body)?;
            find_rpc_response(&events, id)?
        } else {
            body
        };

        let rpc_response: JsonRpcResponse = serde_json::from_str(&json_str)?;

        if let Some(err) = rpc_response.error {
            return Err(Error::Mcp(format!(
                "JSON-RPC error {}: {}",
                err.code, err.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| Error::Mcp("response missing both result and error".into()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), Error> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(&notification);

        if let Some(sid) = self.read_session_id()? {
            builder = builder.header("Mcp-Session-Id", sid);
        }
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await?;
        self.update_session_id(&response)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(Error::Mcp(format!(
                "notification HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        Ok(())
    }
}

impl McpTransport for HttpTransport {
    fn call_tool<'a>(
        &'a self,
        tool: &'a str,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<McpCallResult, Error>> + Send + 'a>> {
        Box::pin(async move {
            let params = json!({
                "name": tool,
                "arguments": normalize_arguments(arguments),
            });
            let result_value = self.rpc("tools/call", Some(params)).await?;
            let wire: McpWireResult = serde_json::from_value(result_value)?;
            Ok(wire.into())
        })
    }
}

// --- Error classification ---

/// Coarse failure category attached to error results so callers can react
/// without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpErrorType {
    ConnectionError,
    Timeout,
    Aborted,
    Unknown,
}

pub fn classify(error: &Error) -> McpErrorType {
    match error {
        Error::Aborted => McpErrorType::Aborted,
        Error::Timeout(_) => McpErrorType::Timeout,
        Error::Http(e) if e.is_timeout() => McpErrorType::Timeout,
        Error::Http(e) if e.is_connect() => McpErrorType::ConnectionError,
        _ => McpErrorType::Unknown,
    }
}

/// Build the error result handed back when a remote call fails.
pub fn error_result(server: &str, tool: &str, error: &Error) -> ToolResult {
    let error_type = classify(error);
    ToolResult::error(format!("MCP call failed: {error}"))
        .with_title(format!("Error: {server}.{tool}"))
        .with_metadata("error_type", json!(error_type))
        .with_metadata("server", json!(server))
        .with_metadata("tool", json!(tool))
        .with_metadata("original_error", json!(error.to_string()))
}

// --- Adapter ---

/// Registry of MCP transports keyed by server id, with per-call timeout
/// and cancellation applied uniformly.
pub struct McpAdapter {
    servers: RwLock<HashMap<String, Arc<dyn McpTransport>>>,
    default_timeout: Duration,
}

impl Default for McpAdapter {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl McpAdapter {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Adapter whose default call timeout comes from `mcp_timeout_secs`.
    pub fn from_config(config: &crate::config::PipelineConfig) -> Self {
        Self::new(config.mcp_timeout())
    }

    pub fn register(&self, server_id: impl Into<String>, transport: Arc<dyn McpTransport>) {
        self.servers
            .write()
            .expect("server registry lock poisoned")
            .insert(server_id.into(), transport);
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.servers
            .read()
            .expect("server registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Call one tool on a registered server. With a context the call races
    /// that invocation's cancellation token; without one only the timeout
    /// applies.
    pub async fn call(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
        ctx: Option<&ToolContext>,
        timeout: Option<Duration>,
    ) -> Result<McpCallResult, Error> {
        let transport = {
            let servers = self.servers.read().expect("server registry lock poisoned");
            servers
                .get(server_id)
                .cloned()
                .ok_or_else(|| Error::Mcp(format!("unknown MCP server '{server_id}'")))?
        };

        let timeout = timeout.unwrap_or(self.default_timeout);
        match ctx {
            Some(ctx) => {
                ctx.race(transport.call_tool(tool, arguments), Some(timeout))
                    .await
            }
            None => tokio::time::timeout(timeout, transport.call_tool(tool, arguments))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
        }
    }
}

// --- RemoteTool ---

/// A discovered MCP tool exposed through the [`Tool`] trait under the name
/// `mcp__<server>__<tool>`.
pub struct RemoteTool {
    adapter: Arc<McpAdapter>,
    server: String,
    tool: String,
    name: String,
    description: String,
    input_schema: Option<Value>,
    permission: Option<String>,
}

impl RemoteTool {
    pub fn new(
        adapter: Arc<McpAdapter>,
        server: impl Into<String>,
        tool: impl Into<String>,
    ) -> Self {
        let server = server.into();
        let tool = tool.into();
        let name = format!("mcp__{server}__{tool}");
        Self {
            adapter,
            server,
            tool,
            name,
            description: String::new(),
            input_schema: None,
            permission: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> Value {
        self.input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object"}))
    }
}

impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolReturn, Error>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(schema) = &self.input_schema
                && let Err(reason) = validate_tool_input(schema, &args)
            {
                return Ok(ToolReturn::Result(ToolResult::error(format!(
                    "invalid arguments: {reason}"
                ))));
            }

            match self
                .adapter
                .call(&self.server, &self.tool, args, Some(ctx), None)
                .await
            {
                Ok(call) => {
                    let mut result = if call.is_error {
                        ToolResult::error(call.content)
                    } else {
                        ToolResult::success(call.content)
                    };
                    result = result
                        .with_metadata("mcp_server", json!(self.server))
                        .with_metadata("mcp_tool", json!(self.tool));
                    for (key, value) in call.metadata {
                        result.metadata.insert(key, value);
                    }
                    Ok(ToolReturn::Result(result))
                }
                // Abort must reach the pipeline so the invocation ends with
                // an aborted event instead of a completed one.
                Err(Error::Aborted) => Err(Error::Aborted),
                Err(e) => {
                    tracing::warn!(
                        server = %self.server,
                        tool = %self.tool,
                        error = %e,
                        "MCP tool call failed"
                    );
                    Ok(ToolReturn::Result(error_result(&self.server, &self.tool, &e)))
                }
            }
        })
    }
}

// --- McpClient ---

/// Connects to an MCP server over streamable HTTP, runs the handshake
/// (initialize, notifications/initialized, tools/list) and turns the
/// discovered tools into [`RemoteTool`]s.
pub struct McpClient {
    transport: Arc<HttpTransport>,
    tools: Vec<McpToolDef>,
}

impl McpClient {
    pub async fn connect(endpoint: &str) -> Result<Self, Error> {
        Self::connect_internal(endpoint, None).await
    }

    /// Connect with an `Authorization` header value, e.g. `"Bearer <token>"`.
    pub async fn connect_with_auth(
        endpoint: &str,
        auth_header: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::connect_internal(endpoint, Some(auth_header.into())).await
    }

    async fn connect_internal(endpoint: &str, auth_header: Option<String>) -> Result<Self, Error> {
        let mut transport = HttpTransport::new(endpoint)?;
        if let Some(auth) = auth_header {
            transport = transport.with_auth(auth);
        }
        let transport = Arc::new(transport);

        // rpc() captures Mcp-Session-Id from the response automatically.
        transport
            .rpc(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "toolpipe",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;

        transport.notify("notifications/initialized", None).await?;

        let tools_result = transport.rpc("tools/list", None).await?;
        let tools_list: McpToolsListResult = serde_json::from_value(tools_result)?;

        Ok(Self {
            transport,
            tools: tools_list.tools,
        })
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Register this connection's transport under `server_id` and expose
    /// every discovered tool as a [`RemoteTool`].
    pub fn into_tools(self, server_id: &str, adapter: &Arc<McpAdapter>) -> Vec<Arc<dyn Tool>> {
        adapter.register(server_id, self.transport as Arc<dyn McpTransport>);
        self.tools
            .into_iter()
            .map(|def| {
                let mut tool = RemoteTool::new(Arc::clone(adapter), server_id, def.name);
                if let Some(description) = def.description {
                    tool = tool.with_description(description);
                }
                if let Some(schema) = def.input_schema {
                    tool = tool.with_input_schema(schema);
                }
                Arc::new(tool) as Arc<dyn Tool>
            })
            .collect()
    }
}
