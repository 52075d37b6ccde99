// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// A runtime event that hooks can subscribe to.
///
/// Event names follow the `tool:<name>:<phase>` convention, e.g.
/// `tool:Bash:pre` fires before the Bash tool executes and
/// `tool:Write:post` after the Write tool completed.
#[derive(Debug, Clone)]
pub struct HookEvent {
    /// Canonical event name, e.g. `tool:Bash:pre`.
    pub name: String,
    /// Event payload exported to the hook's environment.
    pub env: Vec<(String, String)>,
}

impl HookEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), env: Vec::new() }
    }

    /// Event fired before a tool executes.
    pub fn tool_pre(tool_name: &str, arguments: &Value) -> Self {
        Self {
            name: format!("tool:{tool_name}:pre"),
            env: tool_env(tool_name, arguments, None),
        }
    }

    /// Event fired after a tool executed.
    pub fn tool_post(tool_name: &str, arguments: &Value, success: bool) -> Self {
        Self {
            name: format!("tool:{tool_name}:post"),
            env: tool_env(tool_name, arguments, Some(success)),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

fn tool_env(tool_name: &str, arguments: &Value, success: Option<bool>) -> Vec<(String, String)> {
    let mut env = vec![
        ("FORGE_EVENT".to_string(), format!("tool:{tool_name}")),
        ("FORGE_TOOL_NAME".to_string(), tool_name.to_string()),
        ("FORGE_TOOL_ARGS".to_string(), arguments.to_string()),
    ];
    if let Some(ok) = success {
        env.push(("FORGE_TOOL_SUCCESS".to_string(), if ok { "1" } else { "0" }.to_string()));
    }
    env
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
