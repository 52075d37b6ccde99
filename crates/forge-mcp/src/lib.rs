// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod config;
mod error;
mod protocol;
mod transport;

pub use client::McpClient;
pub use config::{McpConfig, McpServerConfig, McpSettings};
pub use error::McpError;
pub use protocol::{
    parse_message, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpCapabilities, McpPrompt, McpPromptMessage, McpResource, McpResourceTemplate, McpServerInfo,
    McpTool, RpcError, PROTOCOL_VERSION,
};
pub use transport::{HttpTransport, McpTransport, StdioTransport};
