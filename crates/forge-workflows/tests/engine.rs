// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end workflow scenarios: ordering across batches, failure and
//! resume from a checkpoint, cycle rejection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forge_workflows::{
    parse_workflow, AgentRunnerRegistry, CheckpointStore, FnRunner, StepRun, WorkflowEngine,
    WorkflowError, WorkflowGraph, WorkflowStep,
};

const DAG: &str = r#"
name: wf
description: t
version: 1.0.0
steps:
  - {id: a, agent: general, description: A}
  - {id: b, agent: general, description: B, depends_on: [a]}
  - {id: c, agent: general, description: C, depends_on: [a], parallel_with: [b]}
"#;

fn engine_in(dir: &tempfile::TempDir) -> (Arc<AgentRunnerRegistry>, WorkflowEngine) {
    let registry = Arc::new(AgentRunnerRegistry::new());
    let engine = WorkflowEngine::new(Arc::clone(&registry), CheckpointStore::new(dir.path()))
        .with_retry_delay(Duration::from_millis(5));
    (registry, engine)
}

fn ok_runner() -> Arc<FnRunner<impl Fn(&WorkflowStep, &str) -> Result<StepRun, String>>> {
    Arc::new(FnRunner(|step: &WorkflowStep, _task: &str| {
        Ok(StepRun { output: format!("done:{}", step.id), undo_ids: vec![] })
    }))
}

// ── Happy path: every step completes and ordering respects depends_on ─────────

#[tokio::test]
async fn happy_path_completes_all_steps_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, engine) = engine_in(&dir);
    registry.register("general", ok_runner());

    let state = engine
        .execute(parse_workflow(DAG).unwrap(), false, None)
        .await
        .unwrap();

    assert!(state.success());
    assert_eq!(state.steps_completed(), 3);

    let a = &state.step_results["a"];
    let b = &state.step_results["b"];
    let c = &state.step_results["c"];
    assert!(b.start >= a.end, "b must start after a ends");
    assert!(c.start >= a.end, "c must start after a ends");

    // Clean completion leaves no checkpoint on disk.
    assert!(!engine.checkpoints().exists("wf"));
}

// ── Failure retains the checkpoint; resume re-runs only the failed step ───────

#[tokio::test]
async fn failure_then_resume_reruns_only_failed_step() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, engine) = engine_in(&dir);

    let a_runs = Arc::new(AtomicU32::new(0));
    let b_runs = Arc::new(AtomicU32::new(0));
    let b_should_fail = Arc::new(AtomicU32::new(1));

    let a_counter = Arc::clone(&a_runs);
    let b_counter = Arc::clone(&b_runs);
    let b_flag = Arc::clone(&b_should_fail);
    registry.register(
        "general",
        Arc::new(FnRunner(move |step: &WorkflowStep, _task: &str| {
            match step.id.as_str() {
                "a" => {
                    a_counter.fetch_add(1, Ordering::SeqCst);
                }
                "b" => {
                    b_counter.fetch_add(1, Ordering::SeqCst);
                    if b_flag.load(Ordering::SeqCst) == 1 {
                        return Err("b failed this time".into());
                    }
                }
                _ => {}
            }
            Ok(StepRun { output: format!("done:{}", step.id), undo_ids: vec![] })
        })),
    );

    // First run: b fails, the checkpoint survives.
    let first = engine
        .execute(parse_workflow(DAG).unwrap(), false, None)
        .await
        .unwrap();
    assert!(!first.success());
    assert_eq!(first.steps_failed(), 1);
    assert!(engine.checkpoints().exists("wf"));

    // Second run with b fixed: resume reuses a (and c) and re-runs only b.
    b_should_fail.store(0, Ordering::SeqCst);
    let second = engine
        .execute(parse_workflow(DAG).unwrap(), true, None)
        .await
        .unwrap();
    assert!(second.success());
    assert_eq!(second.steps_completed(), 3);
    assert_eq!(a_runs.load(Ordering::SeqCst), 1, "a must not be re-invoked");
    assert_eq!(b_runs.load(Ordering::SeqCst), 2, "b is re-invoked exactly once");
    assert!(!engine.checkpoints().exists("wf"));
}

// ── Cycle rejection names both steps ──────────────────────────────────────────

#[tokio::test]
async fn cycle_is_rejected_with_both_steps_named() {
    let cyclic = parse_workflow(
        r#"
name: cyclic
description: t
version: 1.0.0
steps:
  - {id: step1, agent: general, description: A, depends_on: [step2]}
  - {id: step2, agent: general, description: B, depends_on: [step1]}
"#,
    )
    .unwrap();

    let err = WorkflowGraph::from_definition(&cyclic).unwrap_err();
    assert!(matches!(err, WorkflowError::Cycle(_)));
    let message = err.to_string();
    assert!(message.contains("step1"));
    assert!(message.contains("step2"));
}

// ── Resume without a checkpoint is a typed error ──────────────────────────────

#[tokio::test]
async fn resume_without_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, engine) = engine_in(&dir);
    registry.register("general", ok_runner());

    let err = engine
        .execute(parse_workflow(DAG).unwrap(), true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoCheckpoint(_)));
}

// ── Inputs.task reaches the runner ────────────────────────────────────────────

#[tokio::test]
async fn step_task_input_overrides_description() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, engine) = engine_in(&dir);

    let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let seen_inner = Arc::clone(&seen);
    registry.register(
        "general",
        Arc::new(FnRunner(move |_step: &WorkflowStep, task: &str| {
            seen_inner.lock().unwrap().push(task.to_string());
            Ok(StepRun { output: "ok".into(), undo_ids: vec![] })
        })),
    );

    let def = parse_workflow(
        r#"
name: tasks
description: t
version: '1'
steps:
  - id: a
    agent: general
    description: fallback description
    inputs: {task: explicit task text}
  - {id: b, agent: general, description: plain description, depends_on: [a]}
"#,
    )
    .unwrap();
    engine.execute(def, false, None).await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"explicit task text".to_string()));
    assert!(seen.contains(&"plain description".to_string()));
}
