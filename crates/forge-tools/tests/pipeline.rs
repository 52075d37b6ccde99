// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios for the tool execution pipeline: validation,
//! permission gating, undo capture/replay, and background shells.

use std::sync::{Arc, Mutex};

use serde_json::json;

use forge_permissions::{PermissionChecker, PermissionLevel, PermissionRule, RuleSet};
use forge_tools::{builtin_registry, ExecutionContext, ToolCall, ToolRuntime};
use forge_undo::UndoStore;

fn runtime() -> ToolRuntime {
    ToolRuntime::new(Arc::new(builtin_registry()))
}

// ── Edit round trip with undo and redo ────────────────────────────────────────

#[tokio::test]
async fn edit_round_trip_undo_redo() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("x.py");
    std::fs::write(&file, "def hello():\n    pass\n").unwrap();

    let undo = Arc::new(Mutex::new(UndoStore::default()));
    let ctx = ExecutionContext::new(dir.path()).with_undo(Arc::clone(&undo));

    let result = runtime()
        .dispatch(
            &ctx,
            &ToolCall::new(
                "call_1",
                "Edit",
                json!({
                    "file_path": file.to_str().unwrap(),
                    "old_string": "hello",
                    "new_string": "greet"
                }),
            ),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.metadata["replacements"], 1);
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "def greet():\n    pass\n"
    );

    undo.lock().unwrap().undo().unwrap();
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "def hello():\n    pass\n"
    );

    undo.lock().unwrap().redo().unwrap();
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "def greet():\n    pass\n"
    );
}

// ── Permission denial cites the matched pattern, no side effects ──────────────

#[tokio::test]
async fn session_rule_denies_bash_rm_rf() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("victim.txt");
    std::fs::write(&victim, "precious").unwrap();

    let checker =
        Arc::new(PermissionChecker::new(RuleSet::default(), None).without_rate_limiting());
    checker.add_session_rule(
        PermissionRule::new("tool:Bash,arg:command:*rm -rf*", PermissionLevel::Deny)
            .with_priority(100),
    );

    let ctx = ExecutionContext::new(dir.path()).with_permissions(checker);
    let result = runtime()
        .dispatch(
            &ctx,
            &ToolCall::new(
                "call_1",
                "Bash",
                json!({"command": format!("rm -rf {}", dir.path().display())}),
            ),
        )
        .await;

    assert!(!result.success);
    let reason = result.error.as_deref().unwrap();
    assert!(reason.contains("Permission denied"), "reason: {reason}");
    assert!(victim.exists(), "no file may be touched on a denied call");
}

// ── Dangerous pattern blocks without consulting any rules ─────────────────────

#[tokio::test]
async fn dangerous_command_is_blocked_without_spawning() {
    let result = runtime()
        .dispatch(
            &ExecutionContext::new("/tmp"),
            &ToolCall::new("call_1", "Bash", json!({"command": "rm -rf /"})),
        )
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().to_lowercase().contains("blocked"));
}

// ── Background shell: partial output, then the tail ───────────────────────────

#[tokio::test]
async fn background_shell_streams_output_incrementally() {
    let rt = runtime();
    let ctx = ExecutionContext::new("/tmp");

    let started = rt
        .dispatch(
            &ctx,
            &ToolCall::new(
                "call_1",
                "Bash",
                json!({
                    "command": "for i in 1 2 3; do echo $i; sleep 0.15; done",
                    "run_in_background": true
                }),
            ),
        )
        .await;
    assert!(started.success, "{:?}", started.error);
    let bash_id = started.metadata["bash_id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let partial = rt
        .dispatch(&ctx, &ToolCall::new("call_2", "BashOutput", json!({"bash_id": bash_id})))
        .await;
    assert!(partial.success);
    assert!(partial.output.contains('1'), "partial: {}", partial.output);

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let tail = rt
        .dispatch(&ctx, &ToolCall::new("call_3", "BashOutput", json!({"bash_id": bash_id})))
        .await;
    assert!(tail.output.contains('3'), "tail: {}", tail.output);
    assert_eq!(tail.metadata["is_running"], false);
}

// ── Bash mutations are undoable via the detector ──────────────────────────────

#[tokio::test]
async fn bash_redirect_commits_undo_entry() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("log.txt");
    std::fs::write(&file, "before\n").unwrap();

    let undo = Arc::new(Mutex::new(UndoStore::default()));
    let ctx = ExecutionContext::new(dir.path()).with_undo(Arc::clone(&undo));

    let result = runtime()
        .dispatch(
            &ctx,
            &ToolCall::new(
                "call_1",
                "Bash",
                json!({"command": format!("echo after > {}", file.display())}),
            ),
        )
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.metadata.contains_key("undo_id"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "after\n");

    undo.lock().unwrap().undo().unwrap();
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "before\n");
}

// ── Failed tool discards pending captures ─────────────────────────────────────

#[tokio::test]
async fn failed_edit_leaves_history_clean() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.txt");
    std::fs::write(&file, "content").unwrap();

    let undo = Arc::new(Mutex::new(UndoStore::default()));
    let ctx = ExecutionContext::new(dir.path()).with_undo(Arc::clone(&undo));

    let result = runtime()
        .dispatch(
            &ctx,
            &ToolCall::new(
                "call_1",
                "Edit",
                json!({
                    "file_path": file.to_str().unwrap(),
                    "old_string": "missing-needle",
                    "new_string": "x"
                }),
            ),
        )
        .await;
    assert!(!result.success);

    let store = undo.lock().unwrap();
    assert!(!store.can_undo(), "failed call must not pollute history");
    assert!(!store.has_pending());
}
