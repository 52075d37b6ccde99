// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A snapshot of a file taken before a mutation.
///
/// Text files store their content verbatim with `encoding = "utf-8"`;
/// binary files store base64 with `encoding = "binary"`.  A snapshot of a
/// file that did not exist records `existed = false` and no content —
/// restoring such a snapshot deletes the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub file_path: String,
    pub existed: bool,
    pub content: Option<String>,
    pub encoding: String,
    pub is_binary: bool,
    pub size_bytes: u64,
    pub checksum: String,
}

impl FileSnapshot {
    /// Capture the current state of `path`.
    ///
    /// Returns `None` when the file cannot be snapshotted: it is a
    /// directory, exceeds `max_size`, or is unreadable.  The caller may
    /// still proceed with the mutation — the operation is just not undoable.
    pub fn capture(path: &Path, max_size: u64) -> Option<Self> {
        if !path.exists() {
            return Some(Self {
                file_path: path.to_string_lossy().into_owned(),
                existed: false,
                content: None,
                encoding: "utf-8".into(),
                is_binary: false,
                size_bytes: 0,
                checksum: String::new(),
            });
        }
        if !path.is_file() {
            return None;
        }
        let meta = std::fs::metadata(path).ok()?;
        if meta.len() > max_size {
            return None;
        }

        let bytes = std::fs::read(path).ok()?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        let size_bytes = bytes.len() as u64;

        let is_binary = bytes.contains(&0) || std::str::from_utf8(&bytes).is_err();
        let (content, encoding) = if is_binary {
            (base64::engine::general_purpose::STANDARD.encode(&bytes), "binary".to_string())
        } else {
            (String::from_utf8_lossy(&bytes).into_owned(), "utf-8".to_string())
        };

        Some(Self {
            file_path: path.to_string_lossy().into_owned(),
            existed: true,
            content: Some(content),
            encoding,
            is_binary,
            size_bytes,
            checksum,
        })
    }

    /// Restore the file to the snapshotted state.
    ///
    /// If the file did not exist at capture time, it is deleted (an
    /// already-deleted file is not an error).  Otherwise the content is
    /// written back honouring the captured encoding.
    pub fn restore(&self) -> io::Result<()> {
        let path = Path::new(&self.file_path);

        if !self.existed {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = self.content.as_deref().unwrap_or("");
        if self.is_binary {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, bytes)
        } else {
            std::fs::write(path, content)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
