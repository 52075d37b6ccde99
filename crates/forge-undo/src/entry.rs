// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::FileSnapshot;

/// An atomic, reversible group of file snapshots committed by one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: String,
    pub tool_name: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub snapshots: Vec<FileSnapshot>,
    /// The shell command for Bash-originated entries.
    pub command: Option<String>,
    /// Number of touched files that could not be snapshotted (too large,
    /// unreadable).  Those files are not restored by `undo`.
    #[serde(default)]
    pub snapshots_skipped: u32,
}

impl UndoEntry {
    pub fn new(tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            description: description.into(),
            timestamp: Utc::now(),
            snapshots: Vec::new(),
            command: None,
            snapshots_skipped: 0,
        }
    }

    pub fn file_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Exact byte count of captured content.
    pub fn total_size(&self) -> u64 {
        self.snapshots.iter().map(|s| s.size_bytes).sum()
    }

    /// Replay every snapshot in order, restoring content or deleting files
    /// that did not previously exist.  Before restoring, a forward snapshot
    /// of each file's current state is captured so the operation can be
    /// redone.
    ///
    /// Returns the forward snapshots on success.
    pub fn undo(&self) -> io::Result<Vec<FileSnapshot>> {
        let mut forward = Vec::with_capacity(self.snapshots.len());
        for snap in &self.snapshots {
            // Forward snapshots are unbounded: the content was already small
            // enough to capture once, and redo must be able to reproduce it.
            if let Some(current) =
                FileSnapshot::capture(std::path::Path::new(&snap.file_path), u64::MAX)
            {
                forward.push(current);
            }
        }
        for snap in &self.snapshots {
            snap.restore()?;
        }
        Ok(forward)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
