// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow validation failed: {0}")]
    Validation(String),

    #[error("cycle detected in workflow: {0}")]
    Cycle(String),

    #[error("step '{step}' depends on non-existent step '{dependency}'")]
    UnknownStep { step: String, dependency: String },

    #[error("step '{step}' failed: {cause}")]
    StepFailed { step: String, cause: String },

    #[error("workflow cancelled")]
    Cancelled,

    #[error("no checkpoint found for workflow '{0}'")]
    NoCheckpoint(String),

    #[error("unknown agent type '{0}'")]
    UnknownAgent(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    /// Agent type resolved through the runner registry.
    pub agent: String,
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Advisory parallelism hints; unknown references warn but never fail.
    #[serde(default)]
    pub parallel_with: Vec<String>,
    /// Minimal boolean expression over prior step results.
    #[serde(default)]
    pub condition: Option<String>,
    /// Outer wall-clock limit in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_retries: u32,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            description: description.into(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            parallel_with: Vec::new(),
            condition: None,
            timeout: None,
            max_retries: 0,
        }
    }

    /// The task handed to the agent: the `task` input when present, the
    /// description otherwise.
    pub fn task(&self) -> String {
        self.inputs
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.description)
            .to_string()
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Failed,
    Completed,
    Cancelled,
}

/// The recorded outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    /// Undo entries committed during this step, for workflow rollback.
    #[serde(default)]
    pub undo_ids: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    pub fn skipped(step_id: &str, agent_type: &str) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.to_string(),
            agent_type: agent_type.to_string(),
            start: now,
            end: now,
            duration_secs: 0.0,
            success: false,
            result: None,
            error: None,
            skipped: true,
            undo_ids: Vec::new(),
            attempts: 0,
        }
    }
}

/// Execution state, persisted as a checkpoint while not completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub step_results: BTreeMap<String, StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            definition,
            status: WorkflowStatus::Pending,
            current_step: None,
            step_results: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn steps_completed(&self) -> usize {
        self.step_results.values().filter(|r| r.success).count()
    }

    pub fn steps_failed(&self) -> usize {
        self.step_results
            .values()
            .filter(|r| !r.success && !r.skipped)
            .count()
    }

    pub fn steps_skipped(&self) -> usize {
        self.step_results.values().filter(|r| r.skipped).count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_task_prefers_inputs_task() {
        let mut step = WorkflowStep::new("a", "general", "the description");
        assert_eq!(step.task(), "the description");
        step.inputs.insert("task".into(), serde_json::json!("explicit task"));
        assert_eq!(step.task(), "explicit task");
    }

    #[test]
    fn state_counters_partition_results() {
        let def = WorkflowDefinition {
            name: "wf".into(),
            description: "d".into(),
            version: "1.0.0".into(),
            author: None,
            metadata: BTreeMap::new(),
            steps: vec![WorkflowStep::new("a", "general", "A")],
        };
        let mut state = WorkflowState::new(def);

        let mut ok = StepResult::skipped("a", "general");
        ok.success = true;
        ok.skipped = false;
        state.step_results.insert("a".into(), ok);
        state.step_results.insert("b".into(), StepResult::skipped("b", "general"));
        let mut failed = StepResult::skipped("c", "general");
        failed.skipped = false;
        state.step_results.insert("c".into(), failed);

        assert_eq!(state.steps_completed(), 1);
        assert_eq!(state.steps_skipped(), 1);
        assert_eq!(state.steps_failed(), 1);
    }

    #[test]
    fn state_serialisation_round_trip() {
        let def = WorkflowDefinition {
            name: "wf".into(),
            description: "d".into(),
            version: "1.0.0".into(),
            author: Some("me".into()),
            metadata: BTreeMap::new(),
            steps: vec![WorkflowStep::new("a", "general", "A")],
        };
        let state = WorkflowState::new(def);
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, state.id);
        assert_eq!(back.definition.name, "wf");
        assert_eq!(back.status, WorkflowStatus::Pending);
    }
}
