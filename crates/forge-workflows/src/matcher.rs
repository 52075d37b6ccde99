// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Advisory matcher: score a free-text request against registered workflow
//! triggers.  Used by the UI layer to *suggest* running a workflow; never
//! part of the core execution path.

use regex::RegexBuilder;

/// Minimum confidence for a suggestion to surface.
const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Per-keyword confidence boost, capped overall.
const KEYWORD_BOOST: f64 = 0.02;
const KEYWORD_BOOST_CAP: f64 = 0.1;

/// Trigger definition for one workflow.
#[derive(Debug, Clone)]
pub struct WorkflowTrigger {
    pub workflow_name: String,
    /// Regexes matched against the request (case-insensitive).
    pub patterns: Vec<String>,
    /// Keywords that boost confidence when present.
    pub keywords: Vec<String>,
    pub base_confidence: f64,
}

/// A scored match.
#[derive(Debug, Clone)]
pub struct WorkflowMatch {
    pub workflow_name: String,
    pub confidence: f64,
    pub trigger_patterns: Vec<String>,
    pub reason: String,
}

pub struct WorkflowMatcher {
    triggers: Vec<WorkflowTrigger>,
}

impl WorkflowMatcher {
    pub fn new() -> Self {
        Self { triggers: builtin_triggers() }
    }

    pub fn with_triggers(triggers: Vec<WorkflowTrigger>) -> Self {
        Self { triggers }
    }

    pub fn register(&mut self, trigger: WorkflowTrigger) {
        self.triggers.push(trigger);
    }

    /// Score every trigger against the request and return the best match at
    /// or above the confidence threshold.
    pub fn match_request(&self, request: &str) -> Option<WorkflowMatch> {
        let mut best: Option<WorkflowMatch> = None;

        for trigger in &self.triggers {
            let Some(candidate) = score_trigger(trigger, request) else { continue };
            let better = match &best {
                Some(current) => candidate.confidence > current.confidence,
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }

        best.filter(|m| m.confidence >= CONFIDENCE_THRESHOLD)
    }
}

impl Default for WorkflowMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn score_trigger(trigger: &WorkflowTrigger, request: &str) -> Option<WorkflowMatch> {
    let mut matched_patterns = Vec::new();
    for pattern in &trigger.patterns {
        let Ok(re) = RegexBuilder::new(pattern).case_insensitive(true).build() else {
            continue;
        };
        if re.is_match(request) {
            matched_patterns.push(pattern.clone());
        }
    }
    if matched_patterns.is_empty() {
        return None;
    }

    let lowered = request.to_lowercase();
    let keyword_hits = trigger
        .keywords
        .iter()
        .filter(|k| lowered.contains(&k.to_lowercase()))
        .count();
    let boost = (keyword_hits as f64 * KEYWORD_BOOST).min(KEYWORD_BOOST_CAP);
    let confidence = (trigger.base_confidence + boost).min(1.0);

    Some(WorkflowMatch {
        workflow_name: trigger.workflow_name.clone(),
        confidence,
        trigger_patterns: matched_patterns,
        reason: format!(
            "matched {} pattern(s), {keyword_hits} keyword(s)",
            trigger.patterns.len()
        ),
    })
}

fn builtin_triggers() -> Vec<WorkflowTrigger> {
    vec![
        WorkflowTrigger {
            workflow_name: "bug-fix".into(),
            patterns: vec![
                r"(?:fix|debug|investigate)\s+(?:the\s+)?(?:bug|error|issue|problem)".into(),
                r"(?:bug|error|issue|crash)\s+in".into(),
                r"(?:why\s+is|figure\s+out\s+why)\s+\S+\s+(?:failing|broken|crashing)".into(),
            ],
            keywords: vec![
                "bug".into(),
                "error".into(),
                "fix".into(),
                "debug".into(),
                "crash".into(),
                "failing".into(),
            ],
            base_confidence: 0.85,
        },
        WorkflowTrigger {
            workflow_name: "feature-impl".into(),
            patterns: vec![
                r"(?:implement|add|create|build)\s+(?:a\s+)?(?:new\s+)?feature".into(),
                r"(?:add|implement)\s+(?:support\s+for|capability|functionality)".into(),
            ],
            keywords: vec![
                "implement".into(),
                "feature".into(),
                "add".into(),
                "create".into(),
                "new".into(),
            ],
            base_confidence: 0.85,
        },
        WorkflowTrigger {
            workflow_name: "code-quality".into(),
            patterns: vec![
                r"(?:improve|check|analyze)\s+(?:code\s+)?quality".into(),
                r"(?:refactor|clean\s+up|optimize)\s+(?:the\s+)?(?:code|codebase)".into(),
            ],
            keywords: vec!["quality".into(), "refactor".into(), "clean".into()],
            base_confidence: 0.8,
        },
        WorkflowTrigger {
            workflow_name: "security-audit".into(),
            patterns: vec![
                r"(?:run|perform)\s+(?:a\s+)?security\s+(?:audit|scan|check|review)".into(),
                r"(?:check|analyze)\s+(?:for\s+)?(?:security\s+)?vulnerabilities".into(),
            ],
            keywords: vec!["security".into(), "audit".into(), "vulnerability".into()],
            base_confidence: 0.9,
        },
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
