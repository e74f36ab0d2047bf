//! Tool channel — server side.
//!
//! Exposes a [`ToolRegistry`] over stdin/stdout as line-delimited JSON-RPC
//! 2.0 (one JSON object per line). This is what `opsforge tool-server` runs;
//! the executor connects through [`crate::channel::ToolChannel`].

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::policy::ToolPolicy;
use crate::registry::ToolRegistry;

/// Run the stdio serve loop. Returns when stdin closes.
pub async fn run_stdio_server(
    registry: ToolRegistry,
    policy: ToolPolicy,
    server_name: &str,
) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(
                    &mut stdout,
                    json!(null),
                    Some(json!({ "code": -32700, "message": format!("Parse error: {e}") })),
                    None,
                )
                .await?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(json!(null));
        let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let is_notification = request.get("id").is_none();

        match method {
            "initialize" => {
                write_response(
                    &mut stdout,
                    id,
                    None,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": server_name,
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    })),
                )
                .await?;
            }

            "notifications/initialized" => {}

            "tools/list" => {
                let tools: Vec<Value> = registry
                    .get_filtered(&policy)
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.schema().to_json_schema(),
                        })
                    })
                    .collect();
                write_response(&mut stdout, id, None, Some(json!({ "tools": tools }))).await?;
            }

            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(json!({}));
                let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                debug!(tool = %tool_name, "tool-server call");

                let result = if policy.allows(tool_name) {
                    registry.execute(tool_name, arguments).await
                } else {
                    crate::ToolResult::error(format!("tool '{tool_name}' denied by policy"))
                };

                write_response(
                    &mut stdout,
                    id,
                    None,
                    Some(json!({
                        "content": [{ "type": "text", "text": result.content }],
                        "isError": result.is_error,
                    })),
                )
                .await?;
            }

            _ => {
                if !is_notification {
                    write_response(
                        &mut stdout,
                        id,
                        Some(json!({
                            "code": -32601,
                            "message": format!("Method not found: {method}"),
                        })),
                        None,
                    )
                    .await?;
                }
            }
        }
    }

    Ok(())
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    id: Value,
    error: Option<Value>,
    result: Option<Value>,
) -> std::io::Result<()> {
    let response = if let Some(err) = error {
        json!({ "jsonrpc": "2.0", "id": id, "error": err })
    } else {
        json!({ "jsonrpc": "2.0", "id": id, "result": result.unwrap_or(json!(null)) })
    };

    let mut line = serde_json::to_string(&response)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}
