// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::{
    BashFileDetector, ExecutionContext, ParamType, ShellManager, Tool, ToolParameter, ToolResult,
};

/// Timeout wire parameter is in milliseconds (model-facing convention);
/// the conversion to seconds happens here and nowhere else.
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Output cap in characters; the tail is dropped with a marker.
const MAX_OUTPUT_SIZE: usize = 30_000;

/// Shapes that are never allowed to reach a shell, regardless of
/// permission rules.  Word boundaries and post-anchors (`\s`, `;`, `|`,
/// `&`, end) catch piped and chained variants.
const DANGEROUS_PATTERNS: &[&str] = &[
    // rm -rf / in any flag order
    r"rm\s+(-[a-z]*r[a-z]*\s+)*-[a-z]*f[a-z]*\s+/(\s|;|\||&|$)",
    r"rm\s+(-[a-z]*f[a-z]*\s+)*-[a-z]*r[a-z]*\s+/(\s|;|\||&|$)",
    r"rm\s+-rf\s+/\*",
    r"rm\s+-fr\s+/\*",
    // filesystem formatting
    r"mkfs\.",
    // raw disk writes
    r"dd\s+.*of=/dev/[sh]d",
    r">\s*/dev/[sh]d",
    // permission bombs
    r"chmod\s+(-[a-z]*R[a-z]*\s+)*777\s+/(\s|;|\||&|$)",
    r"chmod\s+777\s+(-[a-z]*R[a-z]*\s+)+/(\s|;|\||&|$)",
    // fork bomb
    r":\(\)\s*\{",
    // moving or re-owning the root
    r"mv\s+/\s",
    r"chown\s+(-[a-z]*R[a-z]*\s+)*\S+\s+/(\s|;|\||&|$)",
    // piping a download into a shell
    r"curl\s+.*\|\s*(ba)?sh",
    r"wget\s+.*\|\s*(ba)?sh",
];

/// Execute a shell command, foreground or background.
pub struct BashTool {
    pub default_timeout_ms: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self { default_timeout_ms: DEFAULT_TIMEOUT_MS }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Executes a bash command with an optional timeout.\n\
         - timeout is in milliseconds (default 120000, max 600000)\n\
         - Output over 30000 characters is truncated\n\
         - Use run_in_background=true for long-running commands and read\n\
           their output later with BashOutput\n\
         - Quote paths containing spaces; chain dependent commands with &&"
    }

    fn category(&self) -> &str {
        "execution"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("command", ParamType::String, "The command to execute")
                .required()
                .length(Some(1), None),
            ToolParameter::new(
                "description",
                ParamType::String,
                "Concise description of what this command does",
            ),
            ToolParameter::new("timeout", ParamType::Integer, "Timeout in milliseconds")
                .range(Some(1000.0), Some(MAX_TIMEOUT_MS as f64)),
            ToolParameter::new(
                "run_in_background",
                ParamType::Boolean,
                "Run in the background; read output later with BashOutput",
            )
            .default_value(false),
        ]
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    fn is_mutating(&self) -> bool {
        true
    }

    /// Likely-touched files detected from the command text.
    /// Background commands are never undoable: their completion time is
    /// unknown, so nothing is captured for them.
    fn mutated_paths(&self, ctx: &ExecutionContext, args: &Value) -> Vec<PathBuf> {
        if args.get("run_in_background").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Vec::new();
        }
        let command = args.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        BashFileDetector::detect_files(command, &ctx.working_dir)
            .into_iter()
            .filter(|p| p.exists())
            .collect()
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let command = args["command"].as_str().unwrap_or_default();
        let timeout_ms = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_ms);
        let run_in_background = args["run_in_background"].as_bool().unwrap_or(false);

        if timeout_ms > MAX_TIMEOUT_MS {
            return ToolResult::fail(format!("Timeout exceeds maximum: {MAX_TIMEOUT_MS}ms"));
        }
        if let Some(reason) = check_dangerous(command) {
            return ToolResult::fail(reason);
        }
        if let Some(reason) = validate_working_dir(ctx) {
            return ToolResult::fail(reason);
        }

        debug!(cmd = %command, background = run_in_background, "Bash tool");

        if run_in_background {
            return run_background(command, ctx);
        }
        run_foreground(command, ctx, timeout_ms).await
    }
}

fn check_dangerous(command: &str) -> Option<String> {
    for pattern in DANGEROUS_PATTERNS {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("dangerous pattern must compile");
        if re.is_match(command) {
            return Some("Command blocked for security: matches dangerous pattern".into());
        }
    }
    None
}

fn validate_working_dir(ctx: &ExecutionContext) -> Option<String> {
    let dir = &ctx.working_dir;
    if !dir.exists() {
        return Some(format!("Working directory does not exist: {}", dir.display()));
    }
    if !dir.is_dir() {
        return Some(format!("Working directory is not a directory: {}", dir.display()));
    }
    None
}

async fn run_foreground(command: &str, ctx: &ExecutionContext, timeout_ms: u64) -> ToolResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd.current_dir(&ctx.working_dir);
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    let result = tokio::time::timeout(Duration::from_millis(timeout_ms), cmd.output()).await;

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            let mut text = stdout.into_owned();
            if !stderr.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str("[stderr]\n");
                text.push_str(&stderr);
            }

            let mut truncated = false;
            if text.chars().count() > MAX_OUTPUT_SIZE {
                text = text.chars().take(MAX_OUTPUT_SIZE).collect();
                text.push_str(&format!(
                    "\n\n[Output truncated at {MAX_OUTPUT_SIZE} characters]"
                ));
                truncated = true;
            }

            let exit_code = output.status.code().unwrap_or(-1);
            if exit_code == 0 {
                ToolResult::ok(text)
                    .with_metadata("exit_code", exit_code)
                    .with_metadata("truncated", truncated)
            } else {
                ToolResult::fail(format!("Command failed with exit code {exit_code}\n{text}"))
                    .with_metadata("exit_code", exit_code)
                    .with_metadata("truncated", truncated)
            }
        }
        Ok(Err(e)) => ToolResult::fail(format!("Failed to execute command: {e}")),
        Err(_) => ToolResult::fail(format!("Command timed out after {timeout_ms}ms"))
            .with_metadata("timeout_ms", timeout_ms),
    }
}

fn run_background(command: &str, ctx: &ExecutionContext) -> ToolResult {
    let working_dir = ctx.working_dir.to_string_lossy();
    match ShellManager::global().create(command, &working_dir, None) {
        Ok(handle) => {
            // The handle was just created and is uncontended.
            let id = handle.try_lock().map(|s| s.id.clone()).unwrap_or_default();
            ToolResult::ok(format!(
                "Started background shell: {id}\n\
                 Command: {command}\n\
                 Use BashOutput with bash_id='{id}' to read output."
            ))
            .with_metadata("bash_id", id)
        }
        Err(e) => ToolResult::fail(format!("Failed to start background shell: {e}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
