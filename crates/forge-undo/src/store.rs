// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{FileSnapshot, UndoEntry, UndoHistory, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SNAPSHOT_BYTES};

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("restore failed: {0}")]
    Restore(#[from] std::io::Error),
}

/// Per-session undo store.
///
/// Protocol used by the tool runtime:
/// 1. `capture_before(path)` for every path the tool will touch — captures
///    accumulate in a pending group.
/// 2. `commit(...)` on success — seals the group into an [`UndoEntry`].
/// 3. `discard_pending()` on failure — no history polluted.
///
/// Mutations are serialized by the caller (the store lives behind a lock in
/// the execution context).
#[derive(Debug)]
pub struct UndoStore {
    history: UndoHistory,
    pending: Vec<FileSnapshot>,
    pending_skipped: u32,
    max_snapshot_bytes: u64,
}

impl UndoStore {
    pub fn new(max_entries: usize, max_snapshot_bytes: u64) -> Self {
        Self {
            history: UndoHistory::new(max_entries),
            pending: Vec::new(),
            pending_skipped: 0,
            max_snapshot_bytes,
        }
    }

    /// Snapshot `path` into the pending group.
    ///
    /// Returns `false` when the file could not be snapshotted (too large,
    /// unreadable, a directory); the mutation may still proceed but will not
    /// be undoable for that file.
    pub fn capture_before(&mut self, path: &Path) -> bool {
        match FileSnapshot::capture(path, self.max_snapshot_bytes) {
            Some(snap) => {
                debug!(path = %path.display(), existed = snap.existed, "captured snapshot");
                self.pending.push(snap);
                true
            }
            None => {
                warn!(path = %path.display(), "file not snapshotable; operation not undoable");
                self.pending_skipped += 1;
                false
            }
        }
    }

    /// Seal the pending group into an entry and push it on the undo stack.
    ///
    /// Returns the entry id, or `None` when nothing was captured (the redo
    /// stack is left untouched in that case).
    pub fn commit(
        &mut self,
        tool_name: &str,
        description: &str,
        command: Option<String>,
    ) -> Option<String> {
        if self.pending.is_empty() && self.pending_skipped == 0 {
            return None;
        }
        let mut entry = UndoEntry::new(tool_name, description);
        entry.snapshots = std::mem::take(&mut self.pending);
        entry.snapshots_skipped = std::mem::take(&mut self.pending_skipped);
        entry.command = command;
        if entry.snapshots.is_empty() {
            // Every touched file was unsnapshotable — nothing to restore.
            return None;
        }
        let id = entry.id.clone();
        debug!(
            tool = tool_name,
            files = entry.file_count(),
            skipped = entry.snapshots_skipped,
            "committed undo entry"
        );
        self.history.push(entry);
        Some(id)
    }

    /// Drop pending captures after a failed tool execution.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_skipped = 0;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Undo the most recent entry.  Forward snapshots of the restored files
    /// are pushed on the redo stack.
    pub fn undo(&mut self) -> Result<String, UndoError> {
        let entry = self.history.pop_undo().ok_or(UndoError::NothingToUndo)?;
        let forward = entry.undo()?;

        let mut redo_entry = UndoEntry::new(&entry.tool_name, &entry.description);
        redo_entry.snapshots = forward;
        redo_entry.command = entry.command.clone();
        self.history.push_redo(redo_entry);

        Ok(format!("Undone: {}", entry.description))
    }

    /// Redo the most recently undone entry.
    pub fn redo(&mut self) -> Result<String, UndoError> {
        let entry = self.history.pop_redo().ok_or(UndoError::NothingToRedo)?;
        let backward = entry.undo()?;

        // Re-arm undo without clearing the remaining redo stack: push
        // directly rather than through `push`, which is reserved for fresh
        // commits.
        let mut undo_entry = UndoEntry::new(&entry.tool_name, &entry.description);
        undo_entry.snapshots = backward;
        undo_entry.command = entry.command.clone();
        self.history.undo_stack.push(undo_entry);

        Ok(format!("Redone: {}", entry.description))
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &UndoHistory {
        &self.history
    }

    pub fn total_size(&self) -> u64 {
        self.history.total_size()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.discard_pending();
    }
}

impl Default for UndoStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SNAPSHOT_BYTES)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
