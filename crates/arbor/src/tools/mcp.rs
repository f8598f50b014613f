//! Client for external tool servers speaking JSON-RPC.
//!
//! A registry wraps one configured server. The connection is established
//! lazily on first use: spawn-and-pipe for stdio servers, plain POSTs for
//! streamable HTTP servers. Discovered tools are proxied through
//! [`ToolDefinition`] so the runner treats them like built-ins.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{ToolContext, ToolDefinition, ToolOutput};
use crate::errors::ToolError;
use crate::models::part::{Blob, BlobKind, Part};
use crate::providers::sse::SseParser;
use crate::providers::util::{is_valid_function_name, sanitize_function_name};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// How to reach one external tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Http {
        url: String,
        /// Static headers sent with every request, for auth tokens and the
        /// like.
        #[serde(default)]
        headers: std::collections::HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
}

/// One external server and its lazily opened connection.
pub struct McpRegistry {
    config: McpServerConfig,
    connection: Mutex<Option<Connection>>,
}

enum Connection {
    Stdio(StdioConnection),
    Http(HttpConnection),
}

struct StdioConnection {
    // Held so the server process lives as long as the connection.
    _child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

struct HttpConnection {
    client: reqwest::Client,
    url: String,
    headers: std::collections::HashMap<String, String>,
    session_id: Option<String>,
    next_id: u64,
}

impl McpRegistry {
    pub fn new(config: McpServerConfig) -> Arc<Self> {
        Arc::new(McpRegistry {
            config,
            connection: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Discovers the server's tools, following list pagination, and wraps
    /// each one in a proxy definition.
    pub async fn list_tools(self: &Arc<Self>) -> Result<Vec<Arc<dyn ToolDefinition>>> {
        let mut tools: Vec<Arc<dyn ToolDefinition>> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ToolListPage = serde_json::from_value(result)
                .context("malformed tools/list result")?;
            for info in page.tools {
                // Servers may advertise names the backends reject. The tool
                // is exposed under a cleaned name; calls still use the
                // server's own.
                let exposed_name = if is_valid_function_name(&info.name) {
                    info.name.clone()
                } else {
                    let cleaned = sanitize_function_name(&info.name);
                    warn!(
                        server = %self.config.name,
                        tool = %info.name,
                        exposed = %cleaned,
                        "renamed external tool"
                    );
                    cleaned
                };
                tools.push(Arc::new(McpTool {
                    registry: Arc::clone(self),
                    exposed_name,
                    info,
                }));
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        info!(server = %self.config.name, count = tools.len(), "discovered external tools");
        Ok(tools)
    }

    async fn call(&self, name: &str, args: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": args}))
            .await
            .map_err(|err| ToolError::Failed(format!("{}: {err}", self.config.name)))?;
        decode_call_result(result)
    }

    /// Issues one request, connecting first if needed. The connection lock
    /// is held for the whole exchange; these servers are serial by nature.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let connection = guard
            .as_mut()
            .ok_or_else(|| anyhow!("connection unavailable"))?;
        let result = match connection {
            Connection::Stdio(stdio) => stdio.request(method, params).await,
            Connection::Http(http) => http.request(method, params).await,
        };
        if result.is_err() {
            // Drop a broken connection so the next call reconnects.
            *guard = None;
        }
        result
    }

    async fn connect(&self) -> Result<Connection> {
        let mut connection = match &self.config.transport {
            McpTransport::Stdio { command, args } => {
                debug!(server = %self.config.name, command = %command, "starting tool server");
                let mut child = Command::new(command)
                    .args(args)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .with_context(|| format!("failed to start tool server {command}"))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| anyhow!("tool server stdin unavailable"))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| anyhow!("tool server stdout unavailable"))?;
                Connection::Stdio(StdioConnection {
                    _child: child,
                    stdin,
                    lines: BufReader::new(stdout).lines(),
                    next_id: 0,
                })
            }
            McpTransport::Http { url, headers } => Connection::Http(HttpConnection {
                client: reqwest::Client::new(),
                url: url.clone(),
                headers: headers.clone(),
                session_id: None,
                next_id: 0,
            }),
        };

        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "arbor",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        match &mut connection {
            Connection::Stdio(stdio) => {
                stdio.request("initialize", init_params).await?;
                stdio
                    .send(&json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/initialized",
                        "params": {},
                    }))
                    .await?;
            }
            Connection::Http(http) => {
                http.request("initialize", init_params).await?;
                http.notify("notifications/initialized").await?;
            }
        }
        Ok(connection)
    }
}

impl StdioConnection {
    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        loop {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or_else(|| anyhow!("tool server closed its output"))?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = serde_json::from_str(&line)
                .with_context(|| "tool server sent a non-JSON line")?;
            if let Some(reply) = take_response(&message, id)? {
                return Ok(reply);
            }
        }
    }
}

impl HttpConnection {
    async fn post(&mut self, body: &Value) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(session) = &self.session_id {
            request = request.header("Mcp-Session-Id", session);
        }
        let response = request.send().await.context("tool server unreachable")?;
        if !response.status().is_success()
            && response.status() != reqwest::StatusCode::ACCEPTED
        {
            bail!("tool server returned status {}", response.status());
        }
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }
        Ok(response)
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        self.post(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {},
        }))
        .await?;
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let response = self
            .post(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            // The server streams JSON-RPC messages as events until the
            // response for our id arrives.
            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.context("tool server stream failed")?;
                for event in parser.feed(&chunk) {
                    if event.data.is_empty() {
                        continue;
                    }
                    let message: Value = serde_json::from_str(&event.data)
                        .context("tool server sent malformed event data")?;
                    if let Some(reply) = take_response(&message, id)? {
                        return Ok(reply);
                    }
                }
            }
            bail!("tool server stream ended without a response");
        }

        let message: Value = response
            .json()
            .await
            .context("tool server sent a malformed response")?;
        take_response(&message, id)?
            .ok_or_else(|| anyhow!("tool server answered with a mismatched id"))
    }
}

/// Returns the result if `message` is the response for `id`; handles
/// server-initiated notifications along the way.
fn take_response(message: &Value, id: u64) -> Result<Option<Value>> {
    if message.get("id").is_none() {
        handle_notification(message);
        return Ok(None);
    }
    if message.get("id").and_then(Value::as_u64) != Some(id) {
        debug!("ignoring response for a different request id");
        return Ok(None);
    }
    if let Some(rpc_error) = message.get("error") {
        let detail = rpc_error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("server error: {detail}");
    }
    Ok(Some(
        message
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("response missing result"))?,
    ))
}

/// Server log notifications are forwarded to our own logging at a matching
/// level; anything else is ignored.
fn handle_notification(message: &Value) {
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    if method != "notifications/message" {
        debug!(method, "ignoring server notification");
        return;
    }
    let params = message.get("params").cloned().unwrap_or(Value::Null);
    let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
    let data = params
        .get("data")
        .map(Value::to_string)
        .unwrap_or_default();
    match level {
        "debug" => debug!(target: "arbor::mcp", "{data}"),
        "warning" => warn!(target: "arbor::mcp", "{data}"),
        "error" | "critical" | "alert" | "emergency" => {
            error!(target: "arbor::mcp", "{data}")
        }
        _ => info!(target: "arbor::mcp", "{data}"),
    }
}

// ---- result decoding ----

#[derive(Debug, Deserialize)]
struct ToolListPage {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolInfo {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct CallResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Other,
}

fn decode_call_result(result: Value) -> Result<ToolOutput, ToolError> {
    let decoded: CallResult =
        serde_json::from_value(result).map_err(|err| ToolError::Failed(err.to_string()))?;

    let mut texts: Vec<String> = Vec::new();
    let mut parts: Vec<Part> = Vec::new();
    for item in decoded.content {
        match item {
            ContentItem::Text { text } => texts.push(text),
            ContentItem::Image { data, mime_type } => parts.push(Part::Blob(Blob {
                kind: BlobKind::Image,
                data,
                mime_type,
                filename: None,
            })),
            ContentItem::Other => {}
        }
    }
    let joined = texts.join("\n");

    if decoded.is_error {
        return Err(ToolError::Failed(joined));
    }

    // A lone text item that parses as JSON passes through structured;
    // everything else is surfaced as plain text.
    let response = if texts.len() == 1 {
        serde_json::from_str::<Value>(&texts[0]).unwrap_or_else(|_| json!({"text": joined}))
    } else {
        json!({"text": joined})
    };
    Ok(ToolOutput { response, parts })
}

/// A tool living on an external server, dispatched through its registry.
struct McpTool {
    registry: Arc<McpRegistry>,
    exposed_name: String,
    info: ToolInfo,
}

#[async_trait]
impl ToolDefinition for McpTool {
    fn name(&self) -> &str {
        &self.exposed_name
    }

    fn description(&self) -> &str {
        self.info.description.as_deref().unwrap_or("")
    }

    fn request_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    fn response_schema(&self) -> Value {
        // Servers do not advertise output shapes.
        json!({"type": "object"})
    }

    async fn invoke(
        &self,
        _cx: &ToolContext,
        args: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        self.registry.call(&self.info.name, args).await
    }
}
