// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use forge_model::Message;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session corrupted (primary and backup unreadable): {0}")]
    Corrupted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Conversation tracker state carried alongside the message list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerState {
    #[serde(default)]
    pub active_file: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub turn_count: u32,
}

/// One persisted session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub id: String,
    pub title: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tracker: TrackerState,
}

impl SessionDocument {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created: now,
            updated: now,
            messages: Vec::new(),
            tracker: TrackerState::default(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated = Utc::now();
    }
}

/// JSON-file session persistence with crash-safe writes.
///
/// Every save copies the previous live file aside as `<id>.backup`, writes
/// the new document to a temp file, then renames it over the live file — a
/// resume observes either the pre- or post-state, never a torn one.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the default per-user data directory.
    pub fn default_location() -> Self {
        Self::new(forge_config::sessions_dir())
    }

    fn live_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn backup_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.backup"))
    }

    pub fn save(&self, doc: &SessionDocument) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir)?;
        let live = self.live_path(&doc.id);
        let tmp = self.dir.join(format!("{}.tmp", doc.id));

        if live.exists() {
            std::fs::copy(&live, self.backup_path(&doc.id))?;
        }

        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| SessionError::Corrupted(e.to_string()))?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &live)?;
        debug!(session = %doc.id, messages = doc.messages.len(), "session saved");
        Ok(())
    }

    /// Load a session; a corrupt live file falls back to the backup.
    pub fn resume(&self, id: &str) -> Result<SessionDocument, SessionError> {
        let live = self.live_path(id);
        if !live.exists() && !self.backup_path(id).exists() {
            return Err(SessionError::NotFound(id.to_string()));
        }

        match read_document(&live) {
            Ok(doc) => Ok(doc),
            Err(primary) => {
                warn!(session = %id, "primary unreadable ({primary}), trying backup");
                match read_document(&self.backup_path(id)) {
                    Ok(doc) => Ok(doc),
                    Err(backup) => Err(SessionError::Corrupted(format!(
                        "{id}: primary: {primary}; backup: {backup}"
                    ))),
                }
            }
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.live_path(id).exists()
    }

    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let live = self.live_path(id);
        if live.exists() {
            std::fs::remove_file(live)?;
        }
        let backup = self.backup_path(id);
        if backup.exists() {
            std::fs::remove_file(backup)?;
        }
        Ok(())
    }
}

fn read_document(path: &std::path::Path) -> Result<SessionDocument, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
