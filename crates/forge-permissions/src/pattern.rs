// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use regex::Regex;
use serde_json::Value;

use crate::models::tool_category;

/// Maximum pattern length; longer patterns never compile (ReDoS guard).
const MAX_PATTERN_LENGTH: usize = 500;

/// Size of the compiled-regex LRU cache.
const REGEX_CACHE_SIZE: usize = 256;

/// Matches tool/argument patterns against values.
///
/// Pattern formats (comma-joined conjuncts; all clauses must match):
/// - `tool:name` / `tool:name*` — match tool by name (glob or regex)
/// - `arg:name:pattern` — match an argument value
/// - `category:name` — match the tool category
pub struct PatternMatcher;

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Tool(String),
    Arg { name: String, pattern: String },
    Category(String),
}

impl PatternMatcher {
    /// Check whether `pattern` matches the given tool call.
    pub fn matches(pattern: &str, tool_name: &str, arguments: &Value) -> bool {
        for clause in parse_pattern(pattern) {
            let ok = match &clause {
                Clause::Tool(p) => match_value(p, tool_name),
                Clause::Arg { name, pattern } => match arguments.get(name) {
                    None | Some(Value::Null) => false,
                    Some(v) => match_value(pattern, &value_to_string(v)),
                },
                Clause::Category(tag) => {
                    let cat = tool_category(tool_name);
                    cat.as_str() == tag.as_str()
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Specificity score: exact matches and argument constraints beat
    /// tool-only or category-only patterns.  Ties between rules of equal
    /// priority are broken by this score.
    pub fn specificity(pattern: &str) -> i32 {
        let mut score = 0;
        for clause in parse_pattern(pattern) {
            score += 10;
            match clause {
                Clause::Tool(p) => {
                    if !p.contains('*') && !p.contains('?') {
                        score += 20;
                    } else {
                        score += 5;
                    }
                }
                Clause::Arg { pattern, .. } => {
                    score += 30;
                    if !pattern.contains('*') && !pattern.contains('?') {
                        score += 20;
                    } else {
                        score += 5;
                    }
                }
                Clause::Category(_) => score += 5,
            }
        }
        score
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_pattern(pattern: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    for part in pattern.split(',') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("tool:") {
            clauses.push(Clause::Tool(rest.to_string()));
        } else if let Some(rest) = part.strip_prefix("arg:") {
            match rest.split_once(':') {
                Some((name, pat)) => clauses.push(Clause::Arg {
                    name: name.to_string(),
                    pattern: pat.to_string(),
                }),
                // A bare argument name matches any value.
                None => clauses.push(Clause::Arg { name: rest.to_string(), pattern: "*".into() }),
            }
        } else if let Some(rest) = part.strip_prefix("category:") {
            clauses.push(Clause::Category(rest.to_string()));
        } else {
            clauses.push(Clause::Tool(part.to_string()));
        }
    }
    clauses
}

/// Match a single pattern clause against a value: exact, then regex (when
/// the pattern contains regex metacharacters that are not glob characters),
/// otherwise glob.
fn match_value(pattern: &str, value: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern == value {
        return true;
    }
    let normalized = normalize_path_value(value);
    if is_regex(pattern) {
        match compile_cached(pattern, RegexKind::Verbatim) {
            Some(re) => re.is_match(&normalized),
            None => false,
        }
    } else {
        match compile_cached(pattern, RegexKind::Glob) {
            Some(re) => re.is_match(&normalized),
            None => false,
        }
    }
}

fn is_regex(pattern: &str) -> bool {
    pattern
        .chars()
        .any(|c| matches!(c, '^' | '$' | '+' | '\\' | '(' | ')' | '{' | '}' | '|'))
}

/// Normalize path-like values so traversal encodings cannot dodge rules:
/// `/etc/../etc/passwd` matches the pattern `/etc/passwd`.
/// Non-path values pass through unchanged.
fn normalize_path_value(value: &str) -> String {
    if !(value.contains('/') || value.contains('\\') || value.starts_with('.')) {
        return value.to_string();
    }
    let absolute = value.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in value.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&p) if p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum RegexKind {
    /// Compile the pattern as written (search semantics, unanchored).
    Verbatim,
    /// Translate shell-glob `*`/`?` into an anchored regex.
    Glob,
}

/// Compile and cache a pattern, rejecting shapes known to cause
/// catastrophic backtracking.  Returns `None` for invalid or dangerous
/// patterns — a rule with an uncompilable pattern simply never matches.
fn compile_cached(pattern: &str, kind: RegexKind) -> Option<Regex> {
    static CACHE: Mutex<Option<LruCache<(String, bool), Option<Regex>>>> = Mutex::new(None);

    let key = (pattern.to_string(), kind == RegexKind::Glob);
    let mut guard = CACHE.lock().expect("regex cache poisoned");
    let cache = guard
        .get_or_insert_with(|| LruCache::new(NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap()));

    if let Some(cached) = cache.get(&key) {
        return cached.clone();
    }

    let compiled = compile_uncached(pattern, kind);
    cache.put(key, compiled.clone());
    compiled
}

fn compile_uncached(pattern: &str, kind: RegexKind) -> Option<Regex> {
    if pattern.len() > MAX_PATTERN_LENGTH {
        return None;
    }
    match kind {
        RegexKind::Verbatim => {
            if is_redos_shape(pattern) {
                return None;
            }
            Regex::new(pattern).ok()
        }
        RegexKind::Glob => {
            let mut re = String::from("^");
            for ch in pattern.chars() {
                match ch {
                    '*' => re.push_str(".*"),
                    '?' => re.push('.'),
                    c => re.push_str(&regex::escape(&c.to_string())),
                }
            }
            re.push('$');
            Regex::new(&re).ok()
        }
    }
}

/// Best-effort shape checks for catastrophic backtracking.
///
/// Not a formal guarantee; rejects the common vectors: nested quantifiers
/// like `(a+)+`, doubled quantifiers after a class, and three or more
/// chained `.*` groups.
fn is_redos_shape(pattern: &str) -> bool {
    let nested_quantifier = Regex::new(r"\([^)]*[+*][^)]*\)[+*]").unwrap();
    let doubled_class_quantifier = Regex::new(r"\[[^\]]*\][+*]{2,}").unwrap();
    if nested_quantifier.is_match(pattern) || doubled_class_quantifier.is_match(pattern) {
        return true;
    }
    pattern.matches(".*").count() >= 3
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // ── Pattern parsing ───────────────────────────────────────────────────────

    #[test]
    fn bare_pattern_is_a_tool_clause() {
        assert_eq!(parse_pattern("Bash"), vec![Clause::Tool("Bash".into())]);
    }

    #[test]
    fn combined_pattern_splits_on_comma() {
        let clauses = parse_pattern("tool:Bash,arg:command:*rm*");
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0], Clause::Tool("Bash".into()));
        assert_eq!(
            clauses[1],
            Clause::Arg { name: "command".into(), pattern: "*rm*".into() }
        );
    }

    #[test]
    fn arg_without_pattern_matches_any_value() {
        let clauses = parse_pattern("arg:command");
        assert_eq!(clauses[0], Clause::Arg { name: "command".into(), pattern: "*".into() });
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    #[test]
    fn exact_tool_match() {
        assert!(PatternMatcher::matches("tool:Bash", "Bash", &json!({})));
        assert!(!PatternMatcher::matches("tool:Bash", "Read", &json!({})));
    }

    #[test]
    fn glob_tool_match() {
        assert!(PatternMatcher::matches("tool:Bash*", "BashOutput", &json!({})));
    }

    #[test]
    fn arg_glob_match() {
        let args = json!({"command": "rm -rf /tmp/x"});
        assert!(PatternMatcher::matches("tool:Bash,arg:command:*rm -rf*", "Bash", &args));
    }

    #[test]
    fn arg_clause_fails_when_argument_absent() {
        assert!(!PatternMatcher::matches("arg:command:*", "Bash", &json!({})));
    }

    #[test]
    fn all_conjuncts_must_match() {
        let args = json!({"command": "ls"});
        assert!(!PatternMatcher::matches("tool:Bash,arg:command:*rm*", "Bash", &args));
    }

    #[test]
    fn category_clause_matches_by_table() {
        assert!(PatternMatcher::matches("category:file", "Read", &json!({})));
        assert!(PatternMatcher::matches("category:execution", "Bash", &json!({})));
        assert!(!PatternMatcher::matches("category:file", "Bash", &json!({})));
    }

    #[test]
    fn regex_pattern_matches_value() {
        let args = json!({"file_path": "/tmp/foo"});
        assert!(PatternMatcher::matches("arg:file_path:^/tmp/.*", "Write", &args));
    }

    #[test]
    fn non_string_argument_values_are_stringified() {
        let args = json!({"timeout": 600000});
        assert!(PatternMatcher::matches("arg:timeout:600000", "Bash", &args));
    }

    // ── Path normalization ────────────────────────────────────────────────────

    #[test]
    fn traversal_is_normalized_before_matching() {
        let args = json!({"file_path": "/etc/../etc/passwd"});
        assert!(PatternMatcher::matches("arg:file_path:/etc/passwd", "Read", &args));
    }

    #[test]
    fn normalize_resolves_dot_and_dotdot() {
        assert_eq!(normalize_path_value("/etc/../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize_path_value("/a/./b"), "/a/b");
        assert_eq!(normalize_path_value("a/../../b"), "../b");
        assert_eq!(normalize_path_value("plain"), "plain");
    }

    #[test]
    fn normalize_does_not_escape_root() {
        assert_eq!(normalize_path_value("/../../etc"), "/etc");
    }

    // ── ReDoS protection ──────────────────────────────────────────────────────

    #[test]
    fn overlong_pattern_never_matches() {
        let pattern = format!("^{}$", "a".repeat(600));
        assert!(!PatternMatcher::matches(&pattern, "a", &json!({})));
    }

    #[test]
    fn nested_quantifier_is_rejected() {
        assert!(compile_uncached("(a+)+$", RegexKind::Verbatim).is_none());
        assert!(compile_uncached("(x*)*$", RegexKind::Verbatim).is_none());
    }

    #[test]
    fn chained_dot_star_is_rejected() {
        assert!(compile_uncached("^.*.*.*$", RegexKind::Verbatim).is_none());
    }

    #[test]
    fn plain_regex_still_compiles() {
        assert!(compile_uncached("^/tmp/.*", RegexKind::Verbatim).is_some());
    }

    // ── Specificity ───────────────────────────────────────────────────────────

    #[test]
    fn exact_tool_beats_glob_tool() {
        assert!(
            PatternMatcher::specificity("tool:Bash") > PatternMatcher::specificity("tool:Bash*")
        );
    }

    #[test]
    fn arg_constraint_beats_tool_only() {
        assert!(
            PatternMatcher::specificity("tool:Bash,arg:command:ls")
                > PatternMatcher::specificity("tool:Bash")
        );
    }

    #[test]
    fn category_is_least_specific() {
        assert!(
            PatternMatcher::specificity("category:file") < PatternMatcher::specificity("tool:Read")
        );
    }
}
