// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the MCP client.
#[derive(Debug, Error, Clone)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timeout: {0}")]
    Timeout(String),

    #[error("connection closed")]
    Disconnected,

    /// JSON-RPC error object returned by the server.
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
