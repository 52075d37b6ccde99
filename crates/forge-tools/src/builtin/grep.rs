// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

/// Files above this size are skipped entirely.
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

const DEFAULT_HEAD_LIMIT: usize = 100;

/// Extension families for the `type` filter.
const TYPE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("py", &["py"]),
    ("js", &["js", "jsx"]),
    ("ts", &["ts", "tsx"]),
    ("rust", &["rs"]),
    ("go", &["go"]),
    ("java", &["java"]),
    ("c", &["c", "h"]),
    ("cpp", &["cpp", "hpp", "cc", "hh"]),
    ("md", &["md"]),
    ("json", &["json"]),
    ("yaml", &["yaml", "yml"]),
];

/// Content search with regular expressions, in the spirit of ripgrep.
pub struct GrepTool {
    pub timeout: Duration,
}

impl Default for GrepTool {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone)]
struct FileMatches {
    path: String,
    /// (line_number, line, is_context)
    lines: Vec<(usize, String, bool)>,
    count: usize,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "A powerful content search tool.\n\
         - Full regex syntax (e.g. 'log.*Error', 'fn\\s+\\w+')\n\
         - Filter with 'glob' (e.g. '*.rs') or 'type' (e.g. 'rust')\n\
         - output_mode: 'files_with_matches' (default), 'content', 'count'\n\
         - '-i' case-insensitive; '-A'/'-B'/'-C' context lines for content mode\n\
         - Binary files and files over 10 MiB are skipped"
    }

    fn category(&self) -> &str {
        "search"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("pattern", ParamType::String, "Regular expression to search for")
                .required()
                .length(Some(1), None),
            ToolParameter::new("path", ParamType::String, "File or directory to search in"),
            ToolParameter::new("glob", ParamType::String, "Glob filter, e.g. '*.rs'"),
            ToolParameter::new("type", ParamType::String, "File type family, e.g. 'rust'"),
            ToolParameter::new("output_mode", ParamType::String, "Output mode")
                .default_value("files_with_matches")
                .enum_of(vec![json!("content"), json!("files_with_matches"), json!("count")]),
            ToolParameter::new("-i", ParamType::Boolean, "Case insensitive").default_value(false),
            ToolParameter::new("-n", ParamType::Boolean, "Line numbers in content mode")
                .default_value(true),
            ToolParameter::new("-A", ParamType::Integer, "Lines after each match")
                .range(Some(0.0), None),
            ToolParameter::new("-B", ParamType::Integer, "Lines before each match")
                .range(Some(0.0), None),
            ToolParameter::new("-C", ParamType::Integer, "Lines around each match")
                .range(Some(0.0), None),
            ToolParameter::new("offset", ParamType::Integer, "Skip the first N result entries")
                .range(Some(0.0), None),
            ToolParameter::new("head_limit", ParamType::Integer, "Return at most N result entries")
                .range(Some(1.0), None),
        ]
    }

    async fn execute(&self, ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let pattern = args["pattern"].as_str().unwrap_or_default().to_string();
        let case_insensitive = args["-i"].as_bool().unwrap_or(false);

        let regex = match RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolResult::fail(format!("Invalid regex: {e}")),
        };

        let root = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| ctx.working_dir.clone());

        let glob = args.get("glob").and_then(|v| v.as_str()).map(str::to_string);
        let type_filter = args.get("type").and_then(|v| v.as_str()).map(str::to_string);
        let output_mode = args
            .get("output_mode")
            .and_then(|v| v.as_str())
            .unwrap_or("files_with_matches")
            .to_string();
        let line_numbers = args["-n"].as_bool().unwrap_or(true);
        let around = args.get("-C").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let after = args.get("-A").and_then(|v| v.as_u64()).unwrap_or(0).max(around as u64) as usize;
        let before = args.get("-B").and_then(|v| v.as_u64()).unwrap_or(0).max(around as u64) as usize;
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let head_limit = args
            .get("head_limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_HEAD_LIMIT as u64) as usize;

        let want_lines = output_mode == "content";
        let search = tokio::task::spawn_blocking(move || {
            search_files(&root, &regex, glob.as_deref(), type_filter.as_deref(), want_lines, before, after)
        });

        // Large traversals run on the blocking pool; the wall clock here
        // bounds the coroutine, timing out gracefully.
        let results = match tokio::time::timeout(self.timeout, search).await {
            Ok(Ok(Ok(results))) => results,
            Ok(Ok(Err(e))) => return ToolResult::fail(e),
            Ok(Err(e)) => return ToolResult::fail(format!("search task failed: {e}")),
            Err(_) => {
                return ToolResult::ok(format!(
                    "Search timed out after {}s; results may be incomplete",
                    self.timeout.as_secs()
                ))
                .with_metadata("timed_out", true);
            }
        };

        format_output(&results, &output_mode, line_numbers, offset, head_limit)
    }
}

fn search_files(
    root: &Path,
    regex: &regex::Regex,
    glob: Option<&str>,
    type_filter: Option<&str>,
    want_lines: bool,
    before: usize,
    after: usize,
) -> Result<Vec<FileMatches>, String> {
    if !root.exists() {
        return Err(format!("Path does not exist: {}", root.display()));
    }

    let glob_re = glob.and_then(|g| super::glob::glob_to_regex_for_grep(g));
    let type_exts: Option<&[&str]> = type_filter
        .and_then(|t| TYPE_EXTENSIONS.iter().find(|(name, _)| *name == t))
        .map(|(_, exts)| *exts);

    let files: Vec<PathBuf> = if root.is_file() {
        vec![root.to_path_buf()]
    } else {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                if let Some(re) = &glob_re {
                    let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                    let rel = p.strip_prefix(root).map(|r| r.to_string_lossy()).unwrap_or_default();
                    if !re.is_match(&name) && !re.is_match(&rel) {
                        return false;
                    }
                }
                if let Some(exts) = type_exts {
                    let ext = p.extension().map(|e| e.to_string_lossy().to_lowercase());
                    return matches!(ext, Some(e) if exts.contains(&e.as_str()));
                }
                true
            })
            .collect()
    };

    let mut out = Vec::new();
    for file in files {
        if let Ok(meta) = std::fs::metadata(&file) {
            if meta.len() > MAX_FILE_SIZE {
                continue;
            }
        }
        let Ok(bytes) = std::fs::read(&file) else { continue };
        // Null-byte scan of the head is the binary heuristic.
        if bytes.iter().take(8192).any(|b| *b == 0) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();

        let mut matched: Vec<(usize, String, bool)> = Vec::new();
        let mut count = 0;
        let mut included: Vec<bool> = vec![false; lines.len()];
        let mut is_match: Vec<bool> = vec![false; lines.len()];

        for (i, line) in lines.iter().enumerate() {
            if regex.is_match(line) {
                count += 1;
                is_match[i] = true;
                if want_lines {
                    let start = i.saturating_sub(before);
                    let end = (i + after + 1).min(lines.len());
                    for flag in included.iter_mut().take(end).skip(start) {
                        *flag = true;
                    }
                }
            }
        }

        if count == 0 {
            continue;
        }
        if want_lines {
            for (i, line) in lines.iter().enumerate() {
                if included[i] {
                    matched.push((i + 1, (*line).to_string(), !is_match[i]));
                }
            }
        }

        out.push(FileMatches {
            path: file.to_string_lossy().into_owned(),
            lines: matched,
            count,
        });
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn format_output(
    results: &[FileMatches],
    mode: &str,
    line_numbers: bool,
    offset: usize,
    head_limit: usize,
) -> ToolResult {
    if results.is_empty() {
        return ToolResult::ok("No matches found").with_metadata("match_count", 0);
    }

    let total_matches: usize = results.iter().map(|f| f.count).sum();
    let page = |entries: Vec<String>| -> (Vec<String>, bool) {
        let truncated = entries.len() > offset + head_limit;
        (entries.into_iter().skip(offset).take(head_limit).collect(), truncated)
    };

    let (body, truncated) = match mode {
        "content" => {
            let mut entries = Vec::new();
            for file in results {
                for (num, line, is_context) in &file.lines {
                    let sep = if *is_context { '-' } else { ':' };
                    if line_numbers {
                        entries.push(format!("{}{sep}{num}{sep}{line}", file.path));
                    } else {
                        entries.push(format!("{}{sep}{line}", file.path));
                    }
                }
            }
            page(entries)
        }
        "count" => {
            let entries = results.iter().map(|f| format!("{}:{}", f.path, f.count)).collect();
            page(entries)
        }
        _ => {
            let entries = results.iter().map(|f| f.path.clone()).collect();
            page(entries)
        }
    };

    let mut output = body.join("\n");
    if truncated {
        output.push_str("\n[more results available; raise head_limit or use offset]");
    }
    ToolResult::ok(output)
        .with_metadata("match_count", total_matches)
        .with_metadata("file_count", results.len())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.rs"),
            "fn main() {\n    println!(\"error: boom\");\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.py"), "def main():\n    pass\n").unwrap();
        std::fs::write(dir.path().join("c.rs"), "// no matches here\n").unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3]).unwrap();
        dir
    }

    fn ctx(dir: &tempfile::TempDir) -> ExecutionContext {
        ExecutionContext::new(dir.path())
    }

    #[tokio::test]
    async fn files_with_matches_is_default_and_deduped() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "main"}))
            .await;
        assert!(out.success);
        assert!(out.output.contains("a.rs"));
        assert!(out.output.contains("b.py"));
        assert!(!out.output.contains("c.rs"));
        // One entry per file even with multiple matching lines.
        assert_eq!(out.output.matches("a.rs").count(), 1);
    }

    #[tokio::test]
    async fn content_mode_shows_lines_with_numbers() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(
                &ctx(&dir),
                &json!({"pattern": "error", "output_mode": "content"}),
            )
            .await;
        assert!(out.output.contains(":2:"));
        assert!(out.output.contains("error: boom"));
    }

    #[tokio::test]
    async fn count_mode_reports_per_file_counts() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "main", "output_mode": "count"}))
            .await;
        assert!(out.output.contains("a.rs:1"));
        assert!(out.output.contains("b.py:1"));
    }

    #[tokio::test]
    async fn zero_matches_is_success_with_marker() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "nothing_matches_this"}))
            .await;
        assert!(out.success);
        assert_eq!(out.output, "No matches found");
        assert_eq!(out.metadata["match_count"], 0);
    }

    #[tokio::test]
    async fn case_insensitive_flag() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "ERROR", "-i": true}))
            .await;
        assert!(out.output.contains("a.rs"));
    }

    #[tokio::test]
    async fn glob_filter_restricts_files() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "main", "glob": "*.py"}))
            .await;
        assert!(out.output.contains("b.py"));
        assert!(!out.output.contains("a.rs"));
    }

    #[tokio::test]
    async fn type_filter_restricts_files() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "main", "type": "rust"}))
            .await;
        assert!(out.output.contains("a.rs"));
        assert!(!out.output.contains("b.py"));
    }

    #[tokio::test]
    async fn binary_files_are_skipped() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "."}))
            .await;
        assert!(!out.output.contains("bin.dat"));
    }

    #[tokio::test]
    async fn context_lines_are_marked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let out = GrepTool::default()
            .execute(
                &ExecutionContext::new(dir.path()),
                &json!({"pattern": "three", "output_mode": "content", "-C": 1}),
            )
            .await;
        assert!(out.output.contains("-2-two"));
        assert!(out.output.contains(":3:three"));
        assert!(out.output.contains("-4-four"));
    }

    #[tokio::test]
    async fn head_limit_paginates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "match\n").unwrap();
        }
        let out = GrepTool::default()
            .execute(
                &ExecutionContext::new(dir.path()),
                &json!({"pattern": "match", "head_limit": 2}),
            )
            .await;
        assert_eq!(out.output.lines().filter(|l| l.contains(".txt")).count(), 2);
        assert!(out.output.contains("more results"));
    }

    #[tokio::test]
    async fn offset_skips_entries() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "match\n").unwrap();
        }
        let out = GrepTool::default()
            .execute(
                &ExecutionContext::new(dir.path()),
                &json!({"pattern": "match", "offset": 2, "head_limit": 10}),
            )
            .await;
        assert_eq!(out.output.lines().filter(|l| l.contains(".txt")).count(), 1);
    }

    #[tokio::test]
    async fn invalid_regex_is_an_error() {
        let dir = fixture();
        let out = GrepTool::default()
            .execute(&ctx(&dir), &json!({"pattern": "("}))
            .await;
        assert!(!out.success);
    }
}
