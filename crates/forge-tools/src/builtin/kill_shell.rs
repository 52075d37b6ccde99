// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, ParamType, ShellManager, Tool, ToolParameter, ToolResult};

/// Terminate a background shell by id.
pub struct KillShellTool;

#[async_trait]
impl Tool for KillShellTool {
    fn name(&self) -> &str {
        "KillShell"
    }

    fn description(&self) -> &str {
        "Kills a background shell started with Bash(run_in_background=true)."
    }

    fn category(&self) -> &str {
        "execution"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("bash_id", ParamType::String, "Shell id to terminate")
            .required()]
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let bash_id = args["bash_id"].as_str().unwrap_or_default();

        let Some(handle) = ShellManager::global().get(bash_id) else {
            return ToolResult::fail(format!("No shell with id '{bash_id}'"));
        };

        let mut shell = handle.lock().await;
        let was_running = shell.is_running();
        shell.kill();

        ToolResult::ok(format!(
            "Killed shell {bash_id} ({})",
            if was_running { "was running" } else { "already finished" }
        ))
        .with_metadata("bash_id", bash_id)
        .with_metadata("status", shell.status.as_str())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
