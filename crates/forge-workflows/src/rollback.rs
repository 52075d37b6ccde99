// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use forge_undo::UndoStore;

/// Per-step record of the undo entries created while that step ran.
#[derive(Debug, Clone)]
pub struct RollbackCheckpoint {
    pub step_id: String,
    pub step_name: String,
    pub undo_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RollbackState {
    workflow_id: String,
    workflow_name: String,
    checkpoints: Vec<RollbackCheckpoint>,
    can_rollback: bool,
}

/// Aggregates per-step undo entries so whole workflows (or suffixes of
/// them) can be rolled back through the undo store.
///
/// Only file snapshots are replayed; shell side effects beyond detected
/// file mutations are not reversible.
pub struct WorkflowRollback {
    undo: Option<Arc<Mutex<UndoStore>>>,
    active: Option<RollbackState>,
    history: Vec<RollbackState>,
    max_history: usize,
}

impl WorkflowRollback {
    pub fn new(undo: Option<Arc<Mutex<UndoStore>>>) -> Self {
        Self { undo, active: None, history: Vec::new(), max_history: 10 }
    }

    pub fn can_rollback(&self) -> bool {
        match &self.active {
            Some(state) => {
                state.can_rollback && state.checkpoints.iter().any(|c| !c.undo_ids.is_empty())
            }
            None => false,
        }
    }

    /// Begin tracking a workflow; any previous one is archived.
    pub fn start_workflow(&mut self, workflow_id: &str, workflow_name: &str) {
        if self.active.is_some() {
            self.archive();
        }
        debug!(workflow = workflow_id, "tracking workflow for rollback");
        self.active = Some(RollbackState {
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            checkpoints: Vec::new(),
            can_rollback: true,
        });
    }

    /// Record a step's undo entries after the step finished.
    pub fn checkpoint(&mut self, step_id: &str, step_name: &str, undo_ids: Vec<String>) {
        let Some(state) = &mut self.active else {
            warn!("checkpoint without an active workflow");
            return;
        };
        debug!(step = step_id, entries = undo_ids.len(), "rollback checkpoint");
        state.checkpoints.push(RollbackCheckpoint {
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            undo_ids,
            timestamp: Utc::now(),
        });
    }

    /// Undo everything a single step did (newest entries first).
    /// Returns the number of undo operations performed.
    pub fn rollback_step(&mut self, step_id: &str) -> usize {
        let Some(undo) = self.undo.clone() else { return 0 };
        let Some(state) = &mut self.active else { return 0 };

        let Some(index) = state.checkpoints.iter().position(|c| c.step_id == step_id) else {
            warn!(step = step_id, "no rollback checkpoint for step");
            return 0;
        };
        let checkpoint = state.checkpoints.remove(index);

        let mut count = 0;
        let mut store = undo.lock().expect("undo store poisoned");
        for _ in checkpoint.undo_ids.iter().rev() {
            match store.undo() {
                Ok(_) => count += 1,
                Err(e) => {
                    warn!("rollback undo failed: {e}");
                    break;
                }
            }
        }
        info!(step = step_id, operations = count, "rolled back step");
        count
    }

    /// Undo every step recorded after `step_id` (that step itself is kept).
    pub fn rollback_to_step(&mut self, step_id: &str) -> usize {
        let Some(undo) = self.undo.clone() else { return 0 };
        let Some(state) = &mut self.active else { return 0 };

        let keep_until = state.checkpoints.iter().position(|c| c.step_id == step_id);
        let Some(keep_until) = keep_until else {
            warn!(step = step_id, "no rollback checkpoint for step");
            return 0;
        };
        let dropped: Vec<RollbackCheckpoint> =
            state.checkpoints.drain(keep_until + 1..).collect();

        let total: usize = dropped.iter().map(|c| c.undo_ids.len()).sum();
        let mut count = 0;
        let mut store = undo.lock().expect("undo store poisoned");
        for _ in 0..total {
            match store.undo() {
                Ok(_) => count += 1,
                Err(e) => {
                    warn!("rollback undo failed: {e}");
                    break;
                }
            }
        }
        info!(step = step_id, operations = count, "rolled back to step");
        count
    }

    /// Undo the entire workflow, newest entries first.
    pub fn rollback_workflow(&mut self) -> usize {
        let Some(undo) = self.undo.clone() else { return 0 };
        let Some(state) = &mut self.active else { return 0 };

        let total: usize = state.checkpoints.iter().map(|c| c.undo_ids.len()).sum();
        let mut count = 0;
        {
            let mut store = undo.lock().expect("undo store poisoned");
            for _ in 0..total {
                match store.undo() {
                    Ok(_) => count += 1,
                    Err(e) => {
                        warn!("rollback undo failed: {e}");
                        break;
                    }
                }
            }
        }

        let name = state.workflow_name.clone();
        state.checkpoints.clear();
        state.can_rollback = false;
        info!(workflow = %name, operations = count, "rolled back entire workflow");
        count
    }

    /// Mark the workflow finished and archive its rollback state.
    pub fn complete_workflow(&mut self, success: bool) {
        if let Some(state) = &self.active {
            if success {
                info!(
                    workflow = %state.workflow_name,
                    checkpoints = state.checkpoints.len(),
                    "workflow completed"
                );
            } else {
                warn!(workflow = %state.workflow_name, "workflow failed - rollback may be needed");
            }
        }
        self.archive();
    }

    /// Drop the current workflow without archiving.
    pub fn discard_workflow(&mut self) {
        self.active = None;
    }

    pub fn summary(&self) -> String {
        let Some(state) = &self.active else {
            return "No active workflow".into();
        };
        let total: usize = state.checkpoints.iter().map(|c| c.undo_ids.len()).sum();
        let mut lines = vec![
            format!("Workflow: {} ({})", state.workflow_name, state.workflow_id),
            format!("Steps: {}", state.checkpoints.len()),
            format!("Total undo operations: {total}"),
            format!("Can rollback: {}", if self.can_rollback() { "Yes" } else { "No" }),
        ];
        if !state.checkpoints.is_empty() {
            lines.push(String::new());
            lines.push("Checkpoints:".into());
            for cp in &state.checkpoints {
                lines.push(format!("  - {}: {} operations", cp.step_name, cp.undo_ids.len()));
            }
        }
        lines.join("\n")
    }

    fn archive(&mut self) {
        if let Some(state) = self.active.take() {
            self.history.push(state);
            while self.history.len() > self.max_history {
                self.history.remove(0);
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
