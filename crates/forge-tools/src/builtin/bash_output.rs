// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, ParamType, ShellManager, Tool, ToolParameter, ToolResult};

/// Read output accumulated by a background shell since the last read.
pub struct BashOutputTool;

#[async_trait]
impl Tool for BashOutputTool {
    fn name(&self) -> &str {
        "BashOutput"
    }

    fn description(&self) -> &str {
        "Retrieves new output from a background shell started with \
         Bash(run_in_background=true).\n\
         - Returns only output produced since the last read\n\
         - Reports whether the shell is still running and its exit code"
    }

    fn category(&self) -> &str {
        "execution"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("bash_id", ParamType::String, "Shell id returned by Bash")
            .required()]
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let bash_id = args["bash_id"].as_str().unwrap_or_default();

        let Some(handle) = ShellManager::global().get(bash_id) else {
            return ToolResult::fail(format!("No shell with id '{bash_id}'"));
        };

        let mut shell = handle.lock().await;
        shell.read_output().await;
        let output = shell.new_output(true);
        let is_running = shell.is_running();

        let text = if output.is_empty() {
            "(no new output)".to_string()
        } else {
            output
        };

        let mut result = ToolResult::ok(text)
            .with_metadata("bash_id", bash_id)
            .with_metadata("is_running", is_running)
            .with_metadata("status", shell.status.as_str());
        if let Some(code) = shell.exit_code {
            result = result.with_metadata("exit_code", code);
        }
        if shell.stdout_truncated() || shell.stderr_truncated() {
            result = result.with_metadata("truncated", true);
        }
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
