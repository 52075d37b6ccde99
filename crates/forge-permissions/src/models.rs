// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Outcome level of a permission evaluation.
///
/// Restrictiveness order for tie-breaking: DENY > ASK > ALLOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Allow,
    Ask,
    Deny,
}

impl PermissionLevel {
    /// Rank used when breaking ties between equally specific rules — the
    /// most restrictive permission wins.
    pub fn restrictiveness(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Ask => 1,
            Self::Deny => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Deny => "deny",
        }
    }
}

/// A single permission rule.
///
/// The pattern grammar is a comma-joined conjunction of clauses:
/// - `tool:<glob-or-regex>` — match the tool name
/// - `arg:<name>:<glob-or-regex>` — match an argument value
/// - `category:<tag>` — match the tool category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub pattern: String,
    pub permission: PermissionLevel,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl PermissionRule {
    pub fn new(pattern: impl Into<String>, permission: PermissionLevel) -> Self {
        Self {
            pattern: pattern.into(),
            permission,
            priority: 0,
            enabled: true,
            description: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a permission evaluation.
#[derive(Debug, Clone)]
pub struct PermissionResult {
    pub level: PermissionLevel,
    /// The winning rule, when one matched; `None` for the default outcome.
    pub rule: Option<PermissionRule>,
    pub reason: String,
}

impl PermissionResult {
    pub fn allowed(&self) -> bool {
        self.level == PermissionLevel::Allow
    }

    pub fn denied(&self) -> bool {
        self.level == PermissionLevel::Deny
    }

    pub fn needs_confirmation(&self) -> bool {
        self.level == PermissionLevel::Ask
    }
}

/// Coarse grouping of tools for `category:` patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    File,
    Execution,
    Network,
    Search,
    Task,
    Other,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Execution => "execution",
            Self::Network => "network",
            Self::Search => "search",
            Self::Task => "task",
            Self::Other => "other",
        }
    }
}

/// Static tool → category table used by `category:` pattern clauses.
pub fn tool_category(tool_name: &str) -> ToolCategory {
    match tool_name {
        "Read" | "Write" | "Edit" => ToolCategory::File,
        "Bash" | "BashOutput" | "KillShell" => ToolCategory::Execution,
        "WebFetch" => ToolCategory::Network,
        "Glob" | "Grep" => ToolCategory::Search,
        "Task" => ToolCategory::Task,
        _ => ToolCategory::Other,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_is_most_restrictive() {
        assert!(PermissionLevel::Deny.restrictiveness() > PermissionLevel::Ask.restrictiveness());
        assert!(PermissionLevel::Ask.restrictiveness() > PermissionLevel::Allow.restrictiveness());
    }

    #[test]
    fn rule_round_trips_through_json() {
        let rule = PermissionRule::new("tool:Bash,arg:command:*rm -rf*", PermissionLevel::Deny)
            .with_priority(100)
            .with_description("no recursive deletes");
        let json = serde_json::to_string(&rule).unwrap();
        let back: PermissionRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn rule_deserialises_with_defaults() {
        let rule: PermissionRule =
            serde_json::from_str(r#"{"pattern":"tool:Read","permission":"allow"}"#).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.priority, 0);
        assert!(rule.description.is_none());
    }

    #[test]
    fn permission_level_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&PermissionLevel::Deny).unwrap(), "\"deny\"");
    }

    #[test]
    fn known_tools_have_categories() {
        assert_eq!(tool_category("Read"), ToolCategory::File);
        assert_eq!(tool_category("Bash"), ToolCategory::Execution);
        assert_eq!(tool_category("Grep"), ToolCategory::Search);
        assert_eq!(tool_category("WebFetch"), ToolCategory::Network);
        assert_eq!(tool_category("SomethingElse"), ToolCategory::Other);
    }

    #[test]
    fn result_predicates() {
        let r = PermissionResult {
            level: PermissionLevel::Ask,
            rule: None,
            reason: "default".into(),
        };
        assert!(r.needs_confirmation());
        assert!(!r.allowed());
        assert!(!r.denied());
    }
}
