// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{PermissionLevel, PermissionResult, PermissionRule, RuleSet};

/// Maximum denials allowed inside the sliding window.
const MAX_DENIALS_PER_WINDOW: usize = 10;
/// Sliding window length.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// Backoff period once the threshold is reached.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(300);

/// Layered permission checker for tool execution.
///
/// Rule sources are evaluated in order: session rules (highest priority),
/// project rules, global rules, then the global default.  Every DENY outcome
/// feeds a sliding window; when the window fills, all requests are denied
/// for a backoff period.
pub struct PermissionChecker {
    global_rules: RuleSet,
    project_rules: Option<RuleSet>,
    session_rules: Mutex<RuleSet>,
    rate_limiting: bool,
    rate_state: Mutex<RateState>,
}

#[derive(Default)]
struct RateState {
    denials: VecDeque<Instant>,
    limited_until: Option<Instant>,
}

impl PermissionChecker {
    pub fn new(global_rules: RuleSet, project_rules: Option<RuleSet>) -> Self {
        Self {
            global_rules,
            project_rules,
            session_rules: Mutex::new(RuleSet::new(PermissionLevel::Ask)),
            rate_limiting: true,
            rate_state: Mutex::new(RateState::default()),
        }
    }

    /// Disable the denial rate limiter (used by tests and trusted harnesses).
    pub fn without_rate_limiting(mut self) -> Self {
        self.rate_limiting = false;
        self
    }

    /// Load the checker from `~/.forge/permissions.json` (global) merged with
    /// `<project>/.forge/permissions.json` (project).  Missing files yield
    /// empty layers.
    pub fn from_config(global_path: &Path, project_root: Option<&Path>) -> Self {
        let global_rules = load_ruleset(global_path).unwrap_or_default();
        let project_rules = project_root
            .map(|root| root.join(".forge").join("permissions.json"))
            .and_then(|p| load_ruleset(&p));
        Self::new(global_rules, project_rules)
    }

    /// Check permission for a tool execution.
    pub fn check(&self, tool_name: &str, arguments: &Value) -> PermissionResult {
        if self.rate_limiting {
            if let Some(remaining) = self.rate_limited_remaining() {
                return PermissionResult {
                    level: PermissionLevel::Deny,
                    rule: None,
                    reason: format!(
                        "Rate limit exceeded: too many permission denials. \
                         Try again in {} seconds.",
                        remaining.as_secs()
                    ),
                };
            }
        }

        let result = self.evaluate_layers(tool_name, arguments);
        self.track_result(&result);
        result
    }

    fn evaluate_layers(&self, tool_name: &str, arguments: &Value) -> PermissionResult {
        {
            let session = self.session_rules.lock().expect("session rules poisoned");
            let result = session.evaluate(tool_name, arguments);
            if result.rule.is_some() {
                audit_log(tool_name, &result, "session");
                return result;
            }
        }

        if let Some(project) = &self.project_rules {
            let result = project.evaluate(tool_name, arguments);
            if result.rule.is_some() {
                audit_log(tool_name, &result, "project");
                return result;
            }
        }

        let result = self.global_rules.evaluate(tool_name, arguments);
        if result.rule.is_some() {
            audit_log(tool_name, &result, "global");
            return result;
        }

        let result = PermissionResult {
            level: self.global_rules.default,
            rule: None,
            reason: format!("Using global default: {}", self.global_rules.default.as_str()),
        };
        audit_log(tool_name, &result, "default");
        result
    }

    /// Remaining backoff, or `None` when not limited.  Clears expired state.
    fn rate_limited_remaining(&self) -> Option<Duration> {
        let mut state = self.rate_state.lock().expect("rate state poisoned");
        let now = Instant::now();

        if let Some(until) = state.limited_until {
            if now < until {
                return Some(until - now);
            }
            state.limited_until = None;
            state.denials.clear();
            info!("permission rate-limit backoff expired, counters reset");
            return None;
        }

        while matches!(state.denials.front(), Some(&t) if now.duration_since(t) > RATE_LIMIT_WINDOW)
        {
            state.denials.pop_front();
        }
        if state.denials.len() >= MAX_DENIALS_PER_WINDOW {
            // The window is full but no backoff is armed yet: deny and arm.
            state.limited_until = Some(now + RATE_LIMIT_BACKOFF);
            return Some(RATE_LIMIT_BACKOFF);
        }
        None
    }

    fn track_result(&self, result: &PermissionResult) {
        if !self.rate_limiting || result.level != PermissionLevel::Deny {
            return;
        }
        let mut state = self.rate_state.lock().expect("rate state poisoned");
        let now = Instant::now();
        state.denials.push_back(now);
        while matches!(state.denials.front(), Some(&t) if now.duration_since(t) > RATE_LIMIT_WINDOW)
        {
            state.denials.pop_front();
        }
        if state.denials.len() >= MAX_DENIALS_PER_WINDOW && state.limited_until.is_none() {
            state.limited_until = Some(now + RATE_LIMIT_BACKOFF);
            warn!(
                denials = state.denials.len(),
                window_secs = RATE_LIMIT_WINDOW.as_secs(),
                backoff_secs = RATE_LIMIT_BACKOFF.as_secs(),
                "permission denial threshold exceeded, blocking all requests"
            );
        }
    }

    // ── Session rules ─────────────────────────────────────────────────────────

    /// Add a temporary session rule, replacing any existing rule with the
    /// same pattern.  Session rules are cleared when the session ends.
    pub fn add_session_rule(&self, rule: PermissionRule) {
        let mut session = self.session_rules.lock().expect("session rules poisoned");
        session.remove_rule(&rule.pattern);
        session.add_rule(rule);
    }

    pub fn remove_session_rule(&self, pattern: &str) -> bool {
        self.session_rules
            .lock()
            .expect("session rules poisoned")
            .remove_rule(pattern)
    }

    pub fn clear_session_rules(&self) {
        *self.session_rules.lock().expect("session rules poisoned") =
            RuleSet::new(PermissionLevel::Ask);
    }

    pub fn session_rules(&self) -> Vec<PermissionRule> {
        self.session_rules
            .lock()
            .expect("session rules poisoned")
            .rules
            .clone()
    }

    /// Session rule that always allows this tool (optionally pinned to the
    /// first argument's value).
    pub fn allow_always(&self, tool_name: &str, arguments: Option<&Value>) {
        self.add_session_rule(convenience_rule(tool_name, arguments, PermissionLevel::Allow));
    }

    /// Session rule that always denies this tool.
    pub fn deny_always(&self, tool_name: &str, arguments: Option<&Value>) {
        self.add_session_rule(convenience_rule(tool_name, arguments, PermissionLevel::Deny));
    }
}

fn convenience_rule(
    tool_name: &str,
    arguments: Option<&Value>,
    level: PermissionLevel,
) -> PermissionRule {
    let mut pattern = format!("tool:{tool_name}");
    if let Some(Value::Object(map)) = arguments {
        if let Some((key, value)) = map.iter().next() {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pattern.push_str(&format!(",arg:{key}:{value}"));
        }
    }
    let verb = match level {
        PermissionLevel::Allow => "allow",
        PermissionLevel::Deny => "deny",
        PermissionLevel::Ask => "ask",
    };
    PermissionRule::new(pattern.clone(), level)
        .with_priority(100)
        .with_description(format!("Session {verb}: {pattern}"))
}

fn load_ruleset(path: &Path) -> Option<RuleSet> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(set) => Some(set),
        Err(e) => {
            warn!(path = %path.display(), "invalid permissions file: {e}");
            None
        }
    }
}

fn audit_log(tool_name: &str, result: &PermissionResult, source: &str) {
    let rule_pattern = result.rule.as_ref().map(|r| r.pattern.as_str()).unwrap_or("none");
    match result.level {
        PermissionLevel::Deny => {
            warn!(tool = tool_name, source, rule = rule_pattern, "permission DENIED")
        }
        PermissionLevel::Ask => {
            info!(tool = tool_name, source, rule = rule_pattern, "permission ASK")
        }
        PermissionLevel::Allow => {
            debug!(tool = tool_name, source, rule = rule_pattern, "permission ALLOWED")
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
