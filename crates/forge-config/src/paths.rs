// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

/// Per-user data directory (`~/.forge/`).  Created on first use.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".forge")
}

/// Session documents live under `~/.forge/sessions/`.
pub fn sessions_dir() -> PathBuf {
    data_dir().join("sessions")
}

/// Workflow checkpoints live under `~/.forge/checkpoints/`.
pub fn checkpoints_dir() -> PathBuf {
    data_dir().join("checkpoints")
}

/// Project-level configuration directory (`<project>/.forge/`).
pub fn project_config_dir(project_root: &Path) -> PathBuf {
    project_root.join(".forge")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_ends_with_forge() {
        assert!(data_dir().ends_with(".forge"));
    }

    #[test]
    fn sessions_dir_is_under_data_dir() {
        assert!(sessions_dir().starts_with(data_dir()));
    }

    #[test]
    fn project_config_dir_appends_dot_forge() {
        let dir = project_config_dir(Path::new("/work/repo"));
        assert_eq!(dir, PathBuf::from("/work/repo/.forge"));
    }
}
