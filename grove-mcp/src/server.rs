//! JSON-RPC request handling for the grove MCP tools.

use grove_core::{ErrorEnvelope, GroveError, MatchRecord, RepositoryService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Upper bound on `max_results`, whatever the caller asks for.
const MAX_RESULTS_LIMIT: usize = 1000;

#[derive(Deserialize)]
#[allow(dead_code)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<ErrorEnvelope>,
}

type ToolResult = Result<Value, JsonRpcError>;

fn invalid_params(message: impl Into<String>) -> JsonRpcError {
    JsonRpcError {
        code: -32602,
        message: message.into(),
        data: None,
    }
}

fn tool_failure(err: GroveError) -> JsonRpcError {
    JsonRpcError {
        code: -32000,
        message: err.to_string(),
        data: Some(ErrorEnvelope::from(&err)),
    }
}

fn text_content(text: impl Into<String>) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": text.into()
        }]
    })
}

#[derive(Clone)]
pub struct McpServer {
    service: Arc<RepositoryService>,
    default_max_results: usize,
}

impl McpServer {
    pub fn new(service: Arc<RepositoryService>, default_max_results: usize) -> Self {
        Self {
            service,
            default_max_results,
        }
    }

    /// Handle one request line. Notifications produce no response.
    pub async fn handle_request(&self, line: &str) -> Option<String> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": { "code": -32700, "message": format!("Parse error: {}", e) }
                    })
                    .to_string(),
                );
            }
        };

        if req.method.starts_with("notifications/") {
            return None;
        }

        let id = req.id.clone().unwrap_or(Value::Null);
        tracing::debug!(method = %req.method, %id, "request");

        let result = match req.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(&req.params).await,
            _ => Err(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {}", req.method),
                data: None,
            }),
        };

        let response = match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(value),
                error: None,
            },
            Err(error) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(error),
            },
        };

        match serde_json::to_string(&response) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode response");
                None
            }
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "grove-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn handle_tools_list(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "repo_search",
                    "description": "Search the mirrored repository with a regular expression. Returns matching lines with file path and 1-based line number.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "pattern": {
                                "type": "string",
                                "description": "Regular expression (ripgrep syntax)"
                            },
                            "glob": {
                                "type": "string",
                                "description": "Only search files matching this glob (e.g., 'src/**/*.rs')"
                            },
                            "max_results": {
                                "type": "integer",
                                "description": format!("Maximum matches to return (default: {})", self.default_max_results)
                            }
                        },
                        "required": ["pattern"]
                    }
                },
                {
                    "name": "repo_read",
                    "description": "Read a file from the mirrored repository, optionally a line range. start_line is inclusive, end_line exclusive, both 1-based.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "Path relative to the repository root"
                            },
                            "start_line": {
                                "type": "integer",
                                "description": "First line to return (default: 1)"
                            },
                            "end_line": {
                                "type": "integer",
                                "description": "Line to stop before (default: end of file)"
                            }
                        },
                        "required": ["path"]
                    }
                },
                {
                    "name": "repo_glob",
                    "description": "List files in the mirrored repository matching a glob pattern. '*' stays within one directory, '**' crosses directories.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "pattern": {
                                "type": "string",
                                "description": "Glob pattern (e.g., '**/*.md')"
                            }
                        },
                        "required": ["pattern"]
                    }
                },
                {
                    "name": "repo_context",
                    "description": "Return the repository's context document, kept current with the upstream repository.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {}
                    }
                },
                {
                    "name": "repo_status",
                    "description": "Show the mirrored URL, checkout status, refresh generation and HEAD commit.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {}
                    }
                }
            ]
        })
    }

    async fn handle_tools_call(&self, params: &Option<Value>) -> ToolResult {
        let params = params
            .as_ref()
            .ok_or_else(|| invalid_params("Missing params"))?;

        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid_params("Missing tool name"))?;

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match name {
            "repo_search" => self.tool_search(&arguments).await,
            "repo_read" => self.tool_read(&arguments).await,
            "repo_glob" => self.tool_glob(&arguments).await,
            "repo_context" => self.tool_context().await,
            "repo_status" => self.tool_status().await,
            _ => Err(invalid_params(format!("Unknown tool: {}", name))),
        }
    }

    async fn tool_search(&self, args: &Value) -> ToolResult {
        let pattern = required_str(args, "pattern")?;
        let glob = args.get("glob").and_then(|v| v.as_str());
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.default_max_results)
            .min(MAX_RESULTS_LIMIT);

        // One extra record tells a full page apart from a cut-off one
        let matches = self
            .service
            .search(pattern, glob, max_results + 1)
            .await
            .map_err(tool_failure)?;

        let text = serde_json::to_string_pretty(&search_report(pattern, matches, max_results))
            .unwrap_or_default();
        Ok(text_content(text))
    }

    async fn tool_read(&self, args: &Value) -> ToolResult {
        let path = required_str(args, "path")?;
        let start = optional_int(args, "start_line")?;
        let end = optional_int(args, "end_line")?;

        let text = self
            .service
            .read_file_range(path, start, end)
            .await
            .map_err(tool_failure)?;
        Ok(text_content(text))
    }

    async fn tool_glob(&self, args: &Value) -> ToolResult {
        let pattern = required_str(args, "pattern")?;
        let paths = self.service.glob(pattern).await.map_err(tool_failure)?;
        Ok(text_content(paths.join("\n")))
    }

    async fn tool_context(&self) -> ToolResult {
        let file = self.service.cached_file().await.map_err(tool_failure)?;
        Ok(text_content(&*file.content))
    }

    async fn tool_status(&self) -> ToolResult {
        let status = self.service.status().await;
        let text = serde_json::to_string_pretty(&status).unwrap_or_default();
        Ok(text_content(text))
    }
}

/// Result body for `repo_search`; `matches` may hold one record past the cap.
fn search_report(pattern: &str, mut matches: Vec<MatchRecord>, max_results: usize) -> Value {
    let truncated = matches.len() > max_results;
    matches.truncate(max_results);
    json!({
        "pattern": pattern,
        "count": matches.len(),
        "truncated": truncated,
        "matches": matches,
    })
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, JsonRpcError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid_params(format!("Missing '{}' parameter", key)))
}

fn optional_int(args: &Value, key: &str) -> Result<Option<i64>, JsonRpcError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid_params(format!("'{}' must be an integer", key))),
    }
}
