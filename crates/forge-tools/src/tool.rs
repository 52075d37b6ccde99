// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, ToolParameter, ToolResult};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self { id: id.into(), name: name.into(), args }
    }
}

/// Trait that every built-in tool implements.
///
/// Concrete tools are values held behind `Arc<dyn Tool>` in the registry;
/// the runtime pipeline (validation, permissions, hooks, undo) wraps
/// `execute`, so tool bodies only implement their own semantics and always
/// return a [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Category tag used by `category:` permission patterns.
    fn category(&self) -> &str;
    /// Declared parameters, validated before dispatch.
    fn parameters(&self) -> Vec<ToolParameter>;
    /// Advisory to the UI: surface a confirmation even when allowed.
    fn requires_confirmation(&self) -> bool {
        false
    }
    /// Mutating tools are short-circuited by dry-run and snapshot through
    /// the undo store.
    fn is_mutating(&self) -> bool {
        false
    }
    /// Paths this invocation will touch, for pre-execution snapshots.
    /// Only meaningful when `is_mutating()` is true.
    fn mutated_paths(&self, _ctx: &ExecutionContext, _args: &Value) -> Vec<PathBuf> {
        Vec::new()
    }
    /// Execute the tool body.  Never panics intentionally; failures are
    /// reported through [`ToolResult::fail`].
    async fn execute(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn category(&self) -> &str {
            "other"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _ctx: &ExecutionContext, _args: &Value) -> ToolResult {
            ToolResult::ok("ok")
        }
    }

    #[test]
    fn defaults_are_non_mutating_without_confirmation() {
        let t = MinimalTool;
        assert!(!t.is_mutating());
        assert!(!t.requires_confirmation());
        assert!(t
            .mutated_paths(&ExecutionContext::new("/tmp"), &json!({}))
            .is_empty());
    }

    #[tokio::test]
    async fn execute_returns_result() {
        let out = MinimalTool
            .execute(&ExecutionContext::new("/tmp"), &json!({}))
            .await;
        assert!(out.success);
    }
}
