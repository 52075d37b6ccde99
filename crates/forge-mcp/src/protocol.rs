// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::McpError;

/// MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A JSON-RPC request carrying a monotonic integer id.
#[derive(Debug, Clone)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn to_value(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
            "params": self.params,
        })
    }
}

/// A JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone)]
pub struct JsonRpcNotification {
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn to_value(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": self.method,
            "params": self.params,
        })
    }
}

/// Error object inside a JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC response, matched to a pending request by id.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

/// Any inbound JSON-RPC message.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Request(JsonRpcRequest),
}

/// Classify a raw JSON object into a message variant.
pub fn parse_message(data: Value) -> Result<JsonRpcMessage, McpError> {
    let has_id = data.get("id").map(|v| !v.is_null()).unwrap_or(false);
    let method = data.get("method").and_then(|m| m.as_str());

    match (has_id, method) {
        (true, None) => {
            let error = data
                .get("error")
                .filter(|e| !e.is_null())
                .map(|e| RpcError {
                    code: e["code"].as_i64().unwrap_or(0),
                    message: e["message"].as_str().unwrap_or("unknown error").to_string(),
                });
            if error.is_none() && data.get("result").is_none() {
                return Err(McpError::Protocol("response has neither result nor error".into()));
            }
            Ok(JsonRpcMessage::Response(JsonRpcResponse {
                id: data["id"].clone(),
                result: data.get("result").cloned(),
                error,
            }))
        }
        (true, Some(m)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
            id: data["id"].as_u64().unwrap_or(0),
            method: m.to_string(),
            params: data.get("params").cloned().unwrap_or(Value::Null),
        })),
        (false, Some(m)) => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
            method: m.to_string(),
            params: data.get("params").cloned().unwrap_or(Value::Null),
        })),
        (false, None) => Err(McpError::Protocol("message has neither id nor method".into())),
    }
}

// ─── Server-side entities ─────────────────────────────────────────────────────

/// Capabilities advertised by the server during initialization.
/// Operations gated on an absent capability return empty lists without
/// hitting the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

#[derive(Debug, Clone)]
pub struct McpServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: McpCapabilities,
}

impl McpServerInfo {
    /// Parse the `initialize` response result.
    pub fn from_initialize_result(result: &Value) -> Self {
        let caps = &result["capabilities"];
        Self {
            name: result["serverInfo"]["name"].as_str().unwrap_or("unknown").to_string(),
            version: result["serverInfo"]["version"].as_str().unwrap_or("0").to_string(),
            protocol_version: result["protocolVersion"]
                .as_str()
                .unwrap_or(PROTOCOL_VERSION)
                .to_string(),
            capabilities: McpCapabilities {
                tools: caps.get("tools").map(|v| !v.is_null()).unwrap_or(false),
                resources: caps.get("resources").map(|v| !v.is_null()).unwrap_or(false),
                prompts: caps.get("prompts").map(|v| !v.is_null()).unwrap_or(false),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptMessage {
    pub role: String,
    pub content: Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
