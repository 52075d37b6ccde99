// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

/// Write a file, atomically replacing any existing content.
pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem.\n\
         - file_path must be an absolute path\n\
         - Parent directories are created as needed\n\
         - Existing content is atomically replaced"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("file_path", ParamType::String, "Absolute path to write")
                .required(),
            ToolParameter::new("content", ParamType::String, "Content to write").required(),
        ]
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn mutated_paths(&self, _ctx: &ExecutionContext, args: &Value) -> Vec<PathBuf> {
        args.get("file_path")
            .and_then(|v| v.as_str())
            .map(|p| vec![PathBuf::from(p)])
            .unwrap_or_default()
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let file_path = args["file_path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        let path = Path::new(file_path);

        if !path.is_absolute() {
            return ToolResult::fail(format!("file_path must be absolute, got '{file_path}'"));
        }

        // Lexical normalization catches traversal before the file exists.
        let normalized = normalize(path);
        if let Some(root) = &ctx.allowed_root {
            if !normalized.starts_with(root) {
                return ToolResult::fail(format!(
                    "Path escapes the allowed root: {file_path}"
                ));
            }
        }

        let created = !normalized.exists();

        if let Some(parent) = normalized.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::fail(format!("Cannot create parent directories: {e}"));
            }
        }

        // Atomic replace: write to a sibling temp file, then rename over.
        let tmp = normalized.with_extension("forge-write-tmp");
        if let Err(e) = std::fs::write(&tmp, content) {
            return ToolResult::fail(format!("Cannot write {file_path}: {e}"));
        }
        if let Err(e) = std::fs::rename(&tmp, &normalized) {
            let _ = std::fs::remove_file(&tmp);
            return ToolResult::fail(format!("Cannot replace {file_path}: {e}"));
        }

        ToolResult::ok(format!(
            "{} {}",
            if created { "Created" } else { "Updated" },
            file_path
        ))
        .with_metadata("created", created)
        .with_metadata("bytes_written", content.len())
    }
}

/// Resolve `.` and `..` lexically without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
