// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::{UndoEntry, DEFAULT_MAX_ENTRIES};

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// Bounded LRU of committed undo entries plus a redo stack.
///
/// Any new commit clears the redo stack; when the undo stack exceeds
/// `max_entries` the oldest entries are evicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoHistory {
    pub undo_stack: Vec<UndoEntry>,
    pub redo_stack: Vec<UndoEntry>,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl UndoHistory {
    pub fn new(max_entries: usize) -> Self {
        Self { undo_stack: Vec::new(), redo_stack: Vec::new(), max_entries }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Push a freshly committed entry.  Clears the redo stack and evicts the
    /// oldest entries past the bound.
    pub fn push(&mut self, entry: UndoEntry) {
        self.redo_stack.clear();
        self.undo_stack.push(entry);
        while self.undo_stack.len() > self.max_entries {
            self.undo_stack.remove(0);
        }
    }

    pub fn pop_undo(&mut self) -> Option<UndoEntry> {
        self.undo_stack.pop()
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo_stack.push(entry);
    }

    pub fn pop_redo(&mut self) -> Option<UndoEntry> {
        self.redo_stack.pop()
    }

    pub fn peek_undo(&self) -> Option<&UndoEntry> {
        self.undo_stack.last()
    }

    pub fn peek_redo(&self) -> Option<&UndoEntry> {
        self.redo_stack.last()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Total retained snapshot bytes, exposed for UI display.
    pub fn total_size(&self) -> u64 {
        self.undo_stack.iter().map(|e| e.total_size()).sum()
    }
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
