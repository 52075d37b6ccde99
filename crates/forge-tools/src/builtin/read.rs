// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

/// Default number of lines returned per batch.
const DEFAULT_LIMIT: u64 = 100;

/// Hard per-line cap; longer lines are cut with an ellipsis marker.
const MAX_LINE_CHARS: usize = 2000;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
];

/// Read a file from the filesystem.
pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Reads a file from the local filesystem.\n\
         - file_path must be an absolute path\n\
         - Reads up to 'limit' lines starting at 'offset' (1-based)\n\
         - Lines longer than 2000 characters are truncated\n\
         - Images are returned as base64 with their MIME type\n\
         - Jupyter notebooks are flattened into a cell-annotated text view"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("file_path", ParamType::String, "Absolute path to the file")
                .required(),
            ToolParameter::new("offset", ParamType::Integer, "1-based first line to read")
                .range(Some(1.0), None),
            ToolParameter::new("limit", ParamType::Integer, "Maximum number of lines to read")
                .range(Some(1.0), None),
        ]
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let file_path = args["file_path"].as_str().unwrap_or_default();
        let path = Path::new(file_path);

        if !path.is_absolute() {
            return ToolResult::fail(format!("file_path must be absolute, got '{file_path}'"));
        }
        if !path.exists() {
            return ToolResult::fail(format!(
                "File not found: {file_path}. Check the path or use Glob to locate the file."
            ));
        }
        if path.is_dir() {
            return ToolResult::fail(format!("Path is a directory, not a file: {file_path}"));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if let Some((_, mime)) = IMAGE_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
            return read_image(path, mime);
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => return ToolResult::fail(format!("Cannot read {file_path}: {e}")),
        };

        if ext == "ipynb" {
            return read_notebook(file_path, &bytes);
        }

        if bytes.contains(&0) {
            return ToolResult::fail(format!(
                "Binary file rejected: {file_path}. Read supports text, images and notebooks."
            ));
        }

        let text = String::from_utf8_lossy(&bytes);
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1);
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_LIMIT);

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = (offset as usize).saturating_sub(1);
        if start >= total && total > 0 {
            return ToolResult::fail(format!(
                "offset {offset} is past the end of the file ({total} lines)"
            ));
        }

        let end = (start + limit as usize).min(total);
        let mut out = String::new();
        for (i, line) in all_lines[start..end].iter().enumerate() {
            let mut line = (*line).to_string();
            if line.chars().count() > MAX_LINE_CHARS {
                line = line.chars().take(MAX_LINE_CHARS).collect::<String>() + "…";
            }
            out.push_str(&format!("{:>6}\t{line}\n", start + i + 1));
        }

        ToolResult::ok(out)
            .with_metadata("total_lines", total)
            .with_metadata("lines_returned", end - start)
            .with_metadata("offset", offset)
    }
}

fn read_image(path: &Path, mime: &str) -> ToolResult {
    match std::fs::read(path) {
        Ok(bytes) => {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
            ToolResult::ok(b64)
                .with_metadata("mime_type", mime)
                .with_metadata("is_image", true)
                .with_metadata("size_bytes", bytes.len())
        }
        Err(e) => ToolResult::fail(format!("Cannot read image: {e}")),
    }
}

/// Flatten a Jupyter notebook into a cell-annotated text view.
fn read_notebook(file_path: &str, bytes: &[u8]) -> ToolResult {
    let doc: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return ToolResult::fail(format!("Invalid notebook {file_path}: {e}")),
    };
    let Some(cells) = doc["cells"].as_array() else {
        return ToolResult::fail(format!("Notebook has no cells: {file_path}"));
    };

    let mut out = String::new();
    for (i, cell) in cells.iter().enumerate() {
        let cell_type = cell["cell_type"].as_str().unwrap_or("unknown");
        out.push_str(&format!("── cell {i} [{cell_type}] ──\n"));
        match &cell["source"] {
            Value::Array(lines) => {
                for line in lines {
                    out.push_str(line.as_str().unwrap_or(""));
                }
            }
            Value::String(s) => out.push_str(s),
            _ => {}
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    ToolResult::ok(out).with_metadata("cell_count", cells.len())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("/tmp")
    }

    #[tokio::test]
    async fn relative_path_is_rejected() {
        let out = ReadTool.execute(&ctx(), &json!({"file_path": "rel.txt"})).await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("absolute"));
    }

    #[tokio::test]
    async fn missing_file_suggests_glob() {
        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": "/definitely/not/here.txt"}))
            .await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("Glob"));
    }

    #[tokio::test]
    async fn reads_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "alpha\nbeta\ngamma\n").unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap()}))
            .await;
        assert!(out.success);
        assert!(out.output.contains("1\talpha"));
        assert!(out.output.contains("3\tgamma"));
        assert_eq!(out.metadata["total_lines"], 3);
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(&file, body).unwrap();

        let out = ReadTool
            .execute(
                &ctx(),
                &json!({"file_path": file.to_str().unwrap(), "offset": 4, "limit": 2}),
            )
            .await;
        assert!(out.output.contains("line4"));
        assert!(out.output.contains("line5"));
        assert!(!out.output.contains("line6"));
        assert_eq!(out.metadata["lines_returned"], 2);
    }

    #[tokio::test]
    async fn long_lines_are_truncated_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x".repeat(3000)).unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap()}))
            .await;
        assert!(out.output.contains('…'));
        assert!(out.output.len() < 3000 + 100);
    }

    #[tokio::test]
    async fn binary_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.bin");
        std::fs::write(&file, [0u8, 1, 2]).unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap()}))
            .await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("Binary"));
    }

    #[tokio::test]
    async fn image_is_returned_as_base64() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pic.png");
        std::fs::write(&file, [137u8, 80, 78, 71]).unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap()}))
            .await;
        assert!(out.success);
        assert_eq!(out.metadata["mime_type"], "image/png");
        assert_eq!(out.metadata["is_image"], true);
    }

    #[tokio::test]
    async fn notebook_is_flattened_into_cells() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nb.ipynb");
        let nb = json!({
            "cells": [
                {"cell_type": "markdown", "source": ["# Title\n"]},
                {"cell_type": "code", "source": ["print('hi')\n"]},
            ]
        });
        std::fs::write(&file, nb.to_string()).unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap()}))
            .await;
        assert!(out.success);
        assert!(out.output.contains("cell 0 [markdown]"));
        assert!(out.output.contains("print('hi')"));
        assert_eq!(out.metadata["cell_count"], 2);
    }

    #[tokio::test]
    async fn offset_past_end_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "one\n").unwrap();

        let out = ReadTool
            .execute(&ctx(), &json!({"file_path": file.to_str().unwrap(), "offset": 10}))
            .await;
        assert!(!out.success);
    }
}
