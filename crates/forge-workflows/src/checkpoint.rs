// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::debug;

use crate::{WorkflowError, WorkflowState};

/// Persisted workflow state keyed by workflow name.
///
/// A checkpoint exists while a workflow is incomplete; clean completion
/// deletes it.  Writes are atomic (temp file + rename) so a crash mid-save
/// leaves the previous checkpoint intact.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_location() -> Self {
        Self::new(forge_config::checkpoints_dir())
    }

    fn path(&self, workflow_name: &str) -> PathBuf {
        // Keep the key filesystem-safe.
        let safe: String = workflow_name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn save(&self, state: &WorkflowState) -> Result<(), WorkflowError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&state.definition.name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| WorkflowError::Validation(format!("cannot serialise state: {e}")))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(workflow = %state.definition.name, "checkpoint saved");
        Ok(())
    }

    pub fn load(&self, workflow_name: &str) -> Result<WorkflowState, WorkflowError> {
        let path = self.path(workflow_name);
        if !path.exists() {
            return Err(WorkflowError::NoCheckpoint(workflow_name.to_string()));
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| WorkflowError::Validation(format!("corrupt checkpoint: {e}")))
    }

    pub fn exists(&self, workflow_name: &str) -> bool {
        self.path(workflow_name).exists()
    }

    pub fn delete(&self, workflow_name: &str) -> Result<(), WorkflowError> {
        let path = self.path(workflow_name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
