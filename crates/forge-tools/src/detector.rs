// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use regex::Regex;

/// Best-effort detection of the files a shell command is likely to mutate.
///
/// Used by the Bash tool to capture undo snapshots before execution.
/// Recognised shapes: output redirection (`>`, `>>`), `tee`, `sed -i`,
/// `mv`/`cp` targets, `rm` targets, `touch`, `truncate`.  Device paths and
/// shell variables are ignored — a missed path just means that file is not
/// undoable, never a false restore.
pub struct BashFileDetector;

impl BashFileDetector {
    pub fn detect_files(command: &str, working_dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut push = |raw: &str| {
            let raw = raw.trim_matches(|c| c == '"' || c == '\'');
            if raw.is_empty()
                || raw.starts_with('-')
                || raw.starts_with('$')
                || raw.starts_with("/dev/")
                || raw.contains('*')
            {
                return;
            }
            let path = if Path::new(raw).is_absolute() {
                PathBuf::from(raw)
            } else {
                working_dir.join(raw)
            };
            if !paths.contains(&path) {
                paths.push(path);
            }
        };

        // Output redirections: `cmd > file`, `cmd >> file`, `2> file`.
        let redirect = Regex::new(r#"[0-9]?>{1,2}\s*([^\s;|&<>]+)"#).unwrap();
        for cap in redirect.captures_iter(command) {
            push(&cap[1]);
        }

        // `tee [-a] file...` up to the next pipeline/terminator.
        let tee = Regex::new(r#"\btee\s+(?:-a\s+)?([^\s;|&]+)"#).unwrap();
        for cap in tee.captures_iter(command) {
            push(&cap[1]);
        }

        // `sed -i[ext]` in-place edits: the file operands follow the script.
        let sed = Regex::new(r#"\bsed\s+-i\S*\s+(?:'[^']*'|"[^"]*"|\S+)\s+([^\s;|&]+)"#).unwrap();
        for cap in sed.captures_iter(command) {
            push(&cap[1]);
        }

        // `mv src dst` and `cp src dst`: the destination is mutated; for mv
        // the source disappears too.
        let mv = Regex::new(r#"\bmv\s+([^\s;|&]+)\s+([^\s;|&]+)"#).unwrap();
        for cap in mv.captures_iter(command) {
            push(&cap[1]);
            push(&cap[2]);
        }
        let cp = Regex::new(r#"\bcp\s+(?:-\S+\s+)*[^\s;|&]+\s+([^\s;|&]+)"#).unwrap();
        for cap in cp.captures_iter(command) {
            push(&cap[1]);
        }

        // `rm [flags] files...`
        let rm = Regex::new(r#"\brm\s+((?:-\S+\s+)*)([^;|&]+)"#).unwrap();
        for cap in rm.captures_iter(command) {
            for operand in cap[2].split_whitespace() {
                push(operand);
            }
        }

        // `touch files...` / `truncate -s N file`
        let touch = Regex::new(r#"\btouch\s+([^;|&]+)"#).unwrap();
        for cap in touch.captures_iter(command) {
            for operand in cap[1].split_whitespace() {
                push(operand);
            }
        }
        let truncate = Regex::new(r#"\btruncate\s+-s\s+\S+\s+([^\s;|&]+)"#).unwrap();
        for cap in truncate.captures_iter(command) {
            push(&cap[1]);
        }

        paths
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(cmd: &str) -> Vec<String> {
        BashFileDetector::detect_files(cmd, Path::new("/work"))
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn redirect_targets_are_detected() {
        assert_eq!(detect("echo hi > out.txt"), vec!["/work/out.txt"]);
        assert_eq!(detect("echo hi >> /tmp/log"), vec!["/tmp/log"]);
    }

    #[test]
    fn stderr_redirect_is_detected() {
        assert_eq!(detect("cmd 2> err.log"), vec!["/work/err.log"]);
    }

    #[test]
    fn device_paths_are_ignored() {
        assert!(detect("echo x > /dev/null").is_empty());
    }

    #[test]
    fn tee_target_is_detected() {
        assert_eq!(detect("make | tee build.log"), vec!["/work/build.log"]);
        assert_eq!(detect("make | tee -a build.log"), vec!["/work/build.log"]);
    }

    #[test]
    fn sed_in_place_is_detected() {
        assert_eq!(detect("sed -i 's/a/b/' config.ini"), vec!["/work/config.ini"]);
    }

    #[test]
    fn mv_detects_both_operands() {
        let files = detect("mv old.txt new.txt");
        assert!(files.contains(&"/work/old.txt".to_string()));
        assert!(files.contains(&"/work/new.txt".to_string()));
    }

    #[test]
    fn cp_detects_destination() {
        let files = detect("cp -r src dest");
        assert!(files.contains(&"/work/dest".to_string()));
    }

    #[test]
    fn rm_detects_every_operand() {
        let files = detect("rm -f a.txt b.txt");
        assert!(files.contains(&"/work/a.txt".to_string()));
        assert!(files.contains(&"/work/b.txt".to_string()));
    }

    #[test]
    fn touch_detects_operands() {
        assert_eq!(detect("touch marker"), vec!["/work/marker"]);
    }

    #[test]
    fn globs_and_variables_are_skipped() {
        assert!(detect("rm -f *.tmp").is_empty());
        assert!(detect("echo x > $OUT").is_empty());
    }

    #[test]
    fn plain_commands_detect_nothing() {
        assert!(detect("ls -la").is_empty());
        assert!(detect("git status").is_empty());
    }

    #[test]
    fn duplicates_are_collapsed() {
        assert_eq!(detect("echo a > f && echo b > f").len(), 1);
    }
}
