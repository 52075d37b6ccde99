// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A user-configured shell command bound to an event pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    /// Event pattern, glob-style: `tool:Bash:pre`, `tool:*:post`.
    pub event_pattern: String,
    /// Shell command executed when the event fires.
    pub command: String,
    /// Extra environment for the hook (filtered against the deny-list).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory override.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Per-hook timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

impl Hook {
    pub fn new(event_pattern: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            event_pattern: event_pattern.into(),
            command: command.into(),
            env: HashMap::new(),
            working_dir: None,
            timeout_secs: None,
        }
    }
}

/// Registry of hooks, resolved per event in declaration order.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Mutex<Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Hook) {
        self.hooks.lock().expect("hook registry poisoned").push(hook);
    }

    /// Remove every hook registered for an exact pattern.  Returns the count.
    pub fn unregister(&self, event_pattern: &str) -> usize {
        let mut hooks = self.hooks.lock().expect("hook registry poisoned");
        let before = hooks.len();
        hooks.retain(|h| h.event_pattern != event_pattern);
        before - hooks.len()
    }

    /// All hooks whose pattern matches `event_name`, in declaration order.
    pub fn matching(&self, event_name: &str) -> Vec<Hook> {
        self.hooks
            .lock()
            .expect("hook registry poisoned")
            .iter()
            .filter(|h| pattern_matches(&h.event_pattern, event_name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().expect("hook registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.hooks.lock().expect("hook registry poisoned").clear();
    }
}

/// Glob match for event patterns.  Only `*` and `?` are special.
fn pattern_matches(pattern: &str, event_name: &str) -> bool {
    if pattern == event_name {
        return true;
    }
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|re| re.is_match(event_name)).unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
