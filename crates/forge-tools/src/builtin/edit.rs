// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

/// Exact string replacement in a file.
///
/// Surrounding bytes are preserved exactly — only the matched occurrences
/// change.
pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Performs exact string replacement in a file.\n\
         - old_string must exist in the file and differ from new_string\n\
         - Fails when old_string is ambiguous unless replace_all is set"
    }

    fn category(&self) -> &str {
        "file"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("file_path", ParamType::String, "Absolute path to modify")
                .required(),
            ToolParameter::new("old_string", ParamType::String, "Text to replace").required(),
            ToolParameter::new("new_string", ParamType::String, "Replacement text").required(),
            ToolParameter::new("replace_all", ParamType::Boolean, "Replace every occurrence")
                .default_value(false),
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

    async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let file_path = args["file_path"].as_str().unwrap_or_default();
        let old_string = args["old_string"].as_str().unwrap_or_default();
        let new_string = args["new_string"].as_str().unwrap_or_default();
        let replace_all = args["replace_all"].as_bool().unwrap_or(false);

        let path = Path::new(file_path);
        if !path.is_absolute() {
            return ToolResult::fail(format!("file_path must be absolute, got '{file_path}'"));
        }
        if old_string == new_string {
            return ToolResult::fail("old_string and new_string are identical");
        }
        if old_string.is_empty() {
            return ToolResult::fail("old_string must not be empty");
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => return ToolResult::fail(format!("Cannot read {file_path}: {e}")),
        };

        let occurrences = content.matches(old_string).count();
        if occurrences == 0 {
            return ToolResult::fail(format!("old_string not found in {file_path}"));
        }
        if occurrences > 1 && !replace_all {
            return ToolResult::fail(format!(
                "old_string occurs {occurrences} times in {file_path}; \
                 provide more context or set replace_all"
            ));
        }

        let (updated, replacements) = if replace_all {
            (content.replace(old_string, new_string), occurrences)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };

        if let Err(e) = std::fs::write(path, updated) {
            return ToolResult::fail(format!("Cannot write {file_path}: {e}"));
        }

        ToolResult::ok(format!("Edited {file_path} ({replacements} replacement(s))"))
            .with_metadata("replacements", replacements)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
