//! Tool channel — client side.
//!
//! The executor never holds tool implementations directly: it connects to
//! one or more endpoint processes speaking line-delimited JSON-RPC 2.0 over
//! stdio, lists their tools, and namespaces them as `<endpoint>__<tool>`.
//! Dispatch splits on `__` and routes to the owning endpoint.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use opsforge_provider::ToolSpec;

use crate::ToolResult;

/// Separator between endpoint and tool in namespaced tool names.
pub const NAMESPACE_SEP: &str = "__";

const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(300);
const RPC_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("endpoint '{name}' failed to start: {reason}")]
    Spawn { name: String, reason: String },

    #[error("endpoint '{name}' protocol error: {reason}")]
    Protocol { name: String, reason: String },

    #[error("no endpoint for tool '{0}'")]
    NoEndpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// One tool-server process the executor should connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Endpoint enumeration, written per task by the runner and read here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub endpoints: Vec<EndpointConfig>,
}

impl ChannelConfig {
    pub fn load(path: &Path) -> Result<Self, ChannelError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| ChannelError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ChannelError> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| ChannelError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

struct Endpoint {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl Endpoint {
    /// Send one JSON-RPC request and wait for the matching response.
    /// Requests are strictly sequential per endpoint.
    async fn request(
        &mut self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, String> {
        self.next_id += 1;
        let id = self.next_id;
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut line = serde_json::to_string(&frame).map_err(|e| e.to_string())?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        self.stdin.flush().await.map_err(|e| e.to_string())?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = tokio::time::timeout_at(deadline, self.stdout.read_line(&mut buf))
                .await
                .map_err(|_| format!("rpc '{method}' timed out"))?
                .map_err(|e| e.to_string())?;
            if read == 0 {
                return Err("endpoint closed its stdout".to_string());
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(buf.trim()) else {
                continue; // tolerate stray non-JSON output
            };
            if value.get("id").and_then(|v| v.as_u64()) != Some(id) {
                continue; // notification or stale response
            }
            if let Some(error) = value.get("error") {
                return Err(error.to_string());
            }
            return Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null));
        }
    }
}

/// Connected set of tool endpoints with their namespaced tool list.
pub struct ToolChannel {
    endpoints: HashMap<String, Mutex<Endpoint>>,
    specs: Vec<ToolSpec>,
}

impl ToolChannel {
    /// Spawn and handshake every configured endpoint, collecting tool specs.
    pub async fn connect(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let mut endpoints = HashMap::new();
        let mut specs = Vec::new();

        for entry in &config.endpoints {
            let mut child = Command::new(&entry.command)
                .args(&entry.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ChannelError::Spawn {
                    name: entry.name.clone(),
                    reason: e.to_string(),
                })?;

            let stdin = child.stdin.take().ok_or_else(|| ChannelError::Spawn {
                name: entry.name.clone(),
                reason: "no stdin pipe".into(),
            })?;
            let stdout = child.stdout.take().ok_or_else(|| ChannelError::Spawn {
                name: entry.name.clone(),
                reason: "no stdout pipe".into(),
            })?;

            let mut endpoint = Endpoint {
                child,
                stdin,
                stdout: BufReader::new(stdout),
                next_id: 0,
            };

            endpoint
                .request("initialize", serde_json::json!({}), RPC_SETUP_TIMEOUT)
                .await
                .map_err(|reason| ChannelError::Protocol {
                    name: entry.name.clone(),
                    reason,
                })?;

            let listed = endpoint
                .request("tools/list", serde_json::json!({}), RPC_SETUP_TIMEOUT)
                .await
                .map_err(|reason| ChannelError::Protocol {
                    name: entry.name.clone(),
                    reason,
                })?;

            let tools = listed
                .get("tools")
                .and_then(|t| t.as_array())
                .cloned()
                .unwrap_or_default();
            for tool in tools {
                let name = tool.get("name").and_then(|v| v.as_str()).unwrap_or("");
                if name.is_empty() {
                    continue;
                }
                specs.push(ToolSpec {
                    name: format!("{}{}{}", entry.name, NAMESPACE_SEP, name),
                    description: tool
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or(serde_json::json!({"type": "object"})),
                });
            }

            info!(endpoint = %entry.name, "tool endpoint connected");
            endpoints.insert(entry.name.clone(), Mutex::new(endpoint));
        }

        debug!(tools = specs.len(), "tool channel ready");
        Ok(Self { endpoints, specs })
    }

    /// Namespaced tool definitions across all endpoints.
    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Route a namespaced call (`endpoint__tool`) to its endpoint.
    pub async fn call(&self, namespaced: &str, args: serde_json::Value) -> ToolResult {
        let Some((endpoint_name, tool_name)) = namespaced.split_once(NAMESPACE_SEP) else {
            return ToolResult::error(format!("malformed tool name: {namespaced}"));
        };
        let Some(endpoint) = self.endpoints.get(endpoint_name) else {
            return ToolResult::error(ChannelError::NoEndpoint(namespaced.to_string()).to_string());
        };

        let result = {
            let mut guard = endpoint.lock().await;
            guard
                .request(
                    "tools/call",
                    serde_json::json!({ "name": tool_name, "arguments": args }),
                    RPC_CALL_TIMEOUT,
                )
                .await
        };

        match result {
            Ok(value) => {
                let is_error = value
                    .get("isError")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let content = value
                    .get("content")
                    .and_then(|c| c.as_array())
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                ToolResult { content, is_error }
            }
            Err(reason) => ToolResult::error(format!("tool channel call failed: {reason}")),
        }
    }

    /// Kill all endpoint processes. Idempotent enough to call on every exit path.
    pub async fn shutdown(mut self) {
        for (name, endpoint) in self.endpoints.drain() {
            let mut guard = endpoint.into_inner();
            if let Err(e) = guard.child.kill().await {
                warn!(endpoint = %name, error = %e, "failed to kill tool endpoint");
            }
        }
    }
}

/// Split a namespaced name into (endpoint, tool).
pub fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_split() {
        assert_eq!(split_namespaced("sandbox__read_file"), Some(("sandbox", "read_file")));
        assert_eq!(split_namespaced("plain"), None);
        // Tool names may themselves contain underscores.
        assert_eq!(
            split_namespaced("sandbox__execute_command"),
            Some(("sandbox", "execute_command"))
        );
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolchannel.json");
        let config = ChannelConfig {
            endpoints: vec![EndpointConfig {
                name: "sandbox".into(),
                command: "/usr/local/bin/opsforge".into(),
                args: vec!["tool-server".into(), "--root".into(), "/work".into()],
            }],
        };
        config.save(&path).unwrap();
        let loaded = ChannelConfig::load(&path).unwrap();
        assert_eq!(loaded.endpoints.len(), 1);
        assert_eq!(loaded.endpoints[0].name, "sandbox");
        assert_eq!(loaded.endpoints[0].args[0], "tool-server");
    }
}
