// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

const MAX_RESULTS: usize = 1000;

/// Recursive file pattern matching rooted at a directory.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Fast file pattern matching.\n\
         - Supports glob patterns like '**/*.rs' or 'src/**/*.ts'\n\
         - 'path' roots the search (defaults to the working directory)\n\
         - Returns matching file paths, name-sorted"
    }

    fn category(&self) -> &str {
        "search"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("pattern", ParamType::String, "Glob pattern to match")
                .required()
                .length(Some(1), None),
            ToolParameter::new("path", ParamType::String, "Directory to search in"),
        ]
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| ctx.working_dir.clone());

        if !root.is_dir() {
            return ToolResult::fail(format!("Not a directory: {}", root.display()));
        }

        let Some(re) = glob_to_regex(pattern) else {
            return ToolResult::fail(format!("Invalid glob pattern: {pattern}"));
        };

        let mut matches: Vec<String> = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&root) {
                Ok(r) => r.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            if re.is_match(&rel) {
                matches.push(entry.path().to_string_lossy().into_owned());
                if matches.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        matches.sort();

        if matches.is_empty() {
            return ToolResult::ok("No files found").with_metadata("count", 0);
        }
        let count = matches.len();
        ToolResult::ok(matches.join("\n")).with_metadata("count", count)
    }
}

/// Shared with the Grep tool's `glob` file filter.
pub(crate) fn glob_to_regex_for_grep(pattern: &str) -> Option<Regex> {
    glob_to_regex(pattern)
}

/// Translate a glob into an anchored regex over relative paths.
/// `**` crosses directory separators, `*` and `?` do not.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches the empty prefix.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
