// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PatternMatcher, PermissionLevel, PermissionResult, PermissionRule};

/// Ordered collection of rules plus a default level.
///
/// Evaluation selects all matching enabled rules; the winner is the highest
/// `priority`, then the highest specificity, then the most restrictive
/// permission (DENY > ASK > ALLOW).  Remaining ties fall back to declaration
/// order (the sort is stable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    #[serde(default = "default_level")]
    pub default: PermissionLevel,
}

fn default_level() -> PermissionLevel {
    PermissionLevel::Ask
}

impl Default for RuleSet {
    fn default() -> Self {
        Self { rules: Vec::new(), default: PermissionLevel::Ask }
    }
}

impl RuleSet {
    pub fn new(default: PermissionLevel) -> Self {
        Self { rules: Vec::new(), default }
    }

    pub fn add_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    /// Remove a rule by its pattern.  Returns true when a rule was removed.
    pub fn remove_rule(&mut self, pattern: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.pattern != pattern);
        self.rules.len() != before
    }

    pub fn get_rule(&self, pattern: &str) -> Option<&PermissionRule> {
        self.rules.iter().find(|r| r.pattern == pattern)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rule set against a tool call.
    ///
    /// When no rule matches, the result carries `rule: None` and the set's
    /// default level — callers use `rule.is_some()` to distinguish "this
    /// layer decided" from "fall through to the next layer".
    pub fn evaluate(&self, tool_name: &str, arguments: &Value) -> PermissionResult {
        let mut matches: Vec<(&PermissionRule, i32)> = self
            .rules
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| PatternMatcher::matches(&r.pattern, tool_name, arguments))
            .map(|r| (r, PatternMatcher::specificity(&r.pattern)))
            .collect();

        if matches.is_empty() {
            return PermissionResult {
                level: self.default,
                rule: None,
                reason: format!("No matching rules, using default: {}", self.default.as_str()),
            };
        }

        matches.sort_by(|(a, spec_a), (b, spec_b)| {
            b.priority
                .cmp(&a.priority)
                .then(spec_b.cmp(spec_a))
                .then(b.permission.restrictiveness().cmp(&a.permission.restrictiveness()))
        });

        let (best, _) = matches[0];
        PermissionResult {
            level: best.permission,
            rule: Some(best.clone()),
            reason: best
                .description
                .clone()
                .unwrap_or_else(|| format!("Matched rule: {}", best.pattern)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(pattern: &str, level: PermissionLevel, priority: i32) -> PermissionRule {
        PermissionRule::new(pattern, level).with_priority(priority)
    }

    #[test]
    fn no_match_returns_default_with_no_rule() {
        let set = RuleSet::new(PermissionLevel::Ask);
        let result = set.evaluate("Bash", &json!({}));
        assert_eq!(result.level, PermissionLevel::Ask);
        assert!(result.rule.is_none());
    }

    #[test]
    fn matching_rule_wins_over_default() {
        let mut set = RuleSet::new(PermissionLevel::Ask);
        set.add_rule(rule("tool:Read", PermissionLevel::Allow, 0));
        let result = set.evaluate("Read", &json!({}));
        assert!(result.allowed());
        assert!(result.rule.is_some());
    }

    #[test]
    fn higher_priority_wins() {
        let mut set = RuleSet::new(PermissionLevel::Ask);
        set.add_rule(rule("tool:Bash", PermissionLevel::Allow, 0));
        set.add_rule(rule("tool:Bash", PermissionLevel::Deny, 100));
        assert!(set.evaluate("Bash", &json!({})).denied());
    }

    #[test]
    fn higher_specificity_wins_at_equal_priority() {
        let mut set = RuleSet::new(PermissionLevel::Ask);
        set.add_rule(rule("tool:Bash", PermissionLevel::Allow, 0));
        set.add_rule(rule("tool:Bash,arg:command:*rm*", PermissionLevel::Deny, 0));
        let result = set.evaluate("Bash", &json!({"command": "rm x"}));
        assert!(result.denied());
    }

    #[test]
    fn most_restrictive_wins_full_tie() {
        let mut set = RuleSet::new(PermissionLevel::Ask);
        set.add_rule(rule("tool:Bash", PermissionLevel::Allow, 0));
        set.add_rule(rule("tool:Bash", PermissionLevel::Deny, 0));
        assert!(set.evaluate("Bash", &json!({})).denied());
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut set = RuleSet::new(PermissionLevel::Ask);
        let mut r = rule("tool:Bash", PermissionLevel::Deny, 100);
        r.enabled = false;
        set.add_rule(r);
        let result = set.evaluate("Bash", &json!({}));
        assert!(result.rule.is_none());
    }

    #[test]
    fn remove_rule_by_pattern() {
        let mut set = RuleSet::default();
        set.add_rule(rule("tool:Bash", PermissionLevel::Deny, 0));
        assert!(set.remove_rule("tool:Bash"));
        assert!(!set.remove_rule("tool:Bash"));
        assert!(set.is_empty());
    }

    #[test]
    fn serialization_is_stable() {
        let mut set = RuleSet::new(PermissionLevel::Deny);
        set.add_rule(rule("tool:Read", PermissionLevel::Allow, 5));
        let json = serde_json::to_string(&set).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default, PermissionLevel::Deny);
        assert_eq!(back.rules.len(), 1);
        assert_eq!(back.rules[0], set.rules[0]);
    }

    #[test]
    fn reason_cites_matched_pattern() {
        let mut set = RuleSet::default();
        set.add_rule(rule("tool:Bash,arg:command:*rm -rf*", PermissionLevel::Deny, 100));
        let result = set.evaluate("Bash", &json!({"command": "rm -rf /tmp/anything"}));
        assert!(result.reason.contains("tool:Bash,arg:command:*rm -rf*"));
    }
}
