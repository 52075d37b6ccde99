// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    evaluate_condition, CheckpointStore, StepResult, WorkflowDefinition, WorkflowError,
    WorkflowGraph, WorkflowState, WorkflowStatus, WorkflowStep,
};

/// Outcome of one agent run on behalf of a workflow step.
#[derive(Debug, Clone)]
pub struct StepRun {
    pub output: String,
    /// Undo entries committed while the step ran, for rollback bookkeeping.
    pub undo_ids: Vec<String>,
}

/// Seam between the workflow engine and the agent substrate.
///
/// The production implementation spawns an agent through the agent manager;
/// tests install scripted runners.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, step: &WorkflowStep, task: &str) -> Result<StepRun, String>;
}

/// Process-singleton registry mapping agent type names to runners.
#[derive(Default)]
pub struct AgentRunnerRegistry {
    runners: RwLock<HashMap<String, Arc<dyn AgentRunner>>>,
}

impl AgentRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static AgentRunnerRegistry {
        static INSTANCE: OnceLock<AgentRunnerRegistry> = OnceLock::new();
        INSTANCE.get_or_init(AgentRunnerRegistry::new)
    }

    pub fn register(&self, agent_type: impl Into<String>, runner: Arc<dyn AgentRunner>) {
        self.runners
            .write()
            .expect("runner registry poisoned")
            .insert(agent_type.into(), runner);
    }

    pub fn get(&self, agent_type: &str) -> Option<Arc<dyn AgentRunner>> {
        self.runners
            .read()
            .expect("runner registry poisoned")
            .get(agent_type)
            .cloned()
    }

    pub fn reset(&self) {
        self.runners.write().expect("runner registry poisoned").clear();
    }
}

/// DAG scheduler over the agent loop.
///
/// Steps are executed in Kahn batches; batch members run concurrently, and
/// the next batch observes a happens-after relation with the previous one.
/// The state is checkpointed after every step transition; clean completion
/// deletes the checkpoint, failure retains it for resume.
pub struct WorkflowEngine {
    registry: Arc<AgentRunnerRegistry>,
    checkpoints: CheckpointStore,
    retry_delay: Duration,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<AgentRunnerRegistry>, checkpoints: CheckpointStore) -> Self {
        Self { registry, checkpoints, retry_delay: Duration::from_millis(500) }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Execute a workflow to a terminal state.
    ///
    /// With `resume_from_checkpoint`, previously successful (or skipped)
    /// step results are reused and only the remaining steps run.
    /// `cancel` may be flagged at any time; the run stops at the next step
    /// boundary with status CANCELLED.
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        resume_from_checkpoint: bool,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<WorkflowState, WorkflowError> {
        let graph = WorkflowGraph::from_definition(&definition)?;
        let batches = graph.execution_batches()?;

        let mut state = if resume_from_checkpoint {
            let mut prior = self.checkpoints.load(&definition.name)?;
            // Keep only results that do not need re-running.
            prior.step_results.retain(|_, r| r.success || r.skipped);
            prior.definition = definition;
            prior.status = WorkflowStatus::Running;
            prior.finished_at = None;
            info!(
                workflow = %prior.definition.name,
                reused = prior.step_results.len(),
                "resuming from checkpoint"
            );
            prior
        } else {
            let mut state = WorkflowState::new(definition);
            state.status = WorkflowStatus::Running;
            state
        };
        self.checkpoints.save(&state)?;

        let cancel = cancel.unwrap_or_default();
        let mut failed = false;

        'batches: for batch in batches {
            if cancel.load(Ordering::SeqCst) {
                state.status = WorkflowStatus::Cancelled;
                state.finished_at = Some(Utc::now());
                self.checkpoints.save(&state)?;
                return Ok(state);
            }

            let pending: Vec<&WorkflowStep> = batch
                .iter()
                .filter(|id| !state.step_results.contains_key(*id))
                .filter_map(|id| state.definition.step(id))
                .collect();
            if pending.is_empty() {
                continue;
            }

            let mut tasks: JoinSet<StepResult> = JoinSet::new();
            for step in pending {
                // Condition evaluation happens at step start, against the
                // results of all previous batches.  A false condition skips
                // the step; a skipped step evaluates false downstream, so
                // skips propagate through dependent conditions.
                if let Some(expr) = &step.condition {
                    if !evaluate_condition(expr, &state.step_results)? {
                        debug!(step = %step.id, "condition false, skipping");
                        state
                            .step_results
                            .insert(step.id.clone(), StepResult::skipped(&step.id, &step.agent));
                        continue;
                    }
                }
                if cancel.load(Ordering::SeqCst) {
                    break;
                }

                let runner = self
                    .registry
                    .get(&step.agent)
                    .ok_or_else(|| WorkflowError::UnknownAgent(step.agent.clone()))?;
                let step = step.clone();
                let retry_delay = self.retry_delay;
                state.current_step = Some(step.id.clone());
                tasks.spawn(async move { run_step(step, runner, retry_delay).await });
            }

            while let Some(joined) = tasks.join_next().await {
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("step task panicked: {e}");
                        failed = true;
                        continue;
                    }
                };
                if !result.success && !result.skipped {
                    failed = true;
                }
                state.step_results.insert(result.step_id.clone(), result);
                // Checkpoint after every step transition.
                self.checkpoints.save(&state)?;
            }

            if failed {
                break 'batches;
            }
        }

        state.current_step = None;
        state.finished_at = Some(Utc::now());
        if cancel.load(Ordering::SeqCst) && !failed {
            state.status = WorkflowStatus::Cancelled;
            self.checkpoints.save(&state)?;
        } else if failed {
            state.status = WorkflowStatus::Failed;
            self.checkpoints.save(&state)?;
        } else {
            state.status = WorkflowStatus::Completed;
            self.checkpoints.delete(&state.definition.name)?;
        }

        info!(
            workflow = %state.definition.name,
            status = ?state.status,
            completed = state.steps_completed(),
            failed = state.steps_failed(),
            skipped = state.steps_skipped(),
            "workflow finished"
        );
        Ok(state)
    }
}

/// Execute one step: outer timeout per attempt, retries with a fixed delay,
/// a fresh agent run per attempt.
async fn run_step(
    step: WorkflowStep,
    runner: Arc<dyn AgentRunner>,
    retry_delay: Duration,
) -> StepResult {
    let start = Utc::now();
    let started = std::time::Instant::now();
    let task = step.task();
    let attempts_allowed = step.max_retries + 1;

    let mut attempts = 0;
    let mut last_error = String::new();
    let mut outcome: Option<StepRun> = None;

    while attempts < attempts_allowed {
        attempts += 1;
        debug!(step = %step.id, attempt = attempts, "running step");

        let run = runner.run(&step, &task);
        let result = match step.timeout {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run).await {
                Ok(r) => r,
                Err(_) => Err(format!("step timed out after {secs}s")),
            },
            None => run.await,
        };

        match result {
            Ok(run) => {
                outcome = Some(run);
                break;
            }
            Err(e) => {
                warn!(step = %step.id, attempt = attempts, "step attempt failed: {e}");
                last_error = e;
                if attempts < attempts_allowed {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    let end = Utc::now();
    let duration_secs = started.elapsed().as_secs_f64();
    match outcome {
        Some(run) => StepResult {
            step_id: step.id,
            agent_type: step.agent,
            start,
            end,
            duration_secs,
            success: true,
            result: Some(run.output),
            error: None,
            skipped: false,
            undo_ids: run.undo_ids,
            attempts,
        },
        None => StepResult {
            step_id: step.id,
            agent_type: step.agent,
            start,
            end,
            duration_secs,
            success: false,
            result: None,
            error: Some(last_error),
            skipped: false,
            undo_ids: Vec::new(),
            attempts,
        },
    }
}

/// Convenience for tests and simple embedders: a runner backed by a closure.
pub struct FnRunner<F>(pub F);

#[async_trait]
impl<F> AgentRunner for FnRunner<F>
where
    F: Fn(&WorkflowStep, &str) -> Result<StepRun, String> + Send + Sync,
{
    async fn run(&self, step: &WorkflowStep, task: &str) -> Result<StepRun, String> {
        (self.0)(step, task)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::parse_workflow;

    fn engine(dir: &tempfile::TempDir) -> (Arc<AgentRunnerRegistry>, WorkflowEngine) {
        let registry = Arc::new(AgentRunnerRegistry::new());
        let engine = WorkflowEngine::new(Arc::clone(&registry), CheckpointStore::new(dir.path()))
            .with_retry_delay(Duration::from_millis(5));
        (registry, engine)
    }

    fn ok_runner() -> Arc<dyn AgentRunner> {
        Arc::new(FnRunner(|step: &WorkflowStep, _task: &str| {
            Ok(StepRun { output: format!("done:{}", step.id), undo_ids: vec![] })
        }))
    }

    #[tokio::test]
    async fn single_step_workflow_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);
        registry.register("general", ok_runner());

        let def = parse_workflow(
            "name: single\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: general, description: A}]\n",
        )
        .unwrap();
        let state = engine.execute(def, false, None).await.unwrap();
        assert!(state.success());
        assert_eq!(state.steps_completed(), 1);
        assert!(!engine.checkpoints().exists("single"));
    }

    #[tokio::test]
    async fn unknown_agent_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_registry, engine) = engine(&dir);
        let def = parse_workflow(
            "name: x\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: ghost, description: A}]\n",
        )
        .unwrap();
        assert!(matches!(
            engine.execute(def, false, None).await,
            Err(WorkflowError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn retries_rerun_failed_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = Arc::clone(&calls);
        registry.register(
            "flaky",
            Arc::new(FnRunner(move |_step: &WorkflowStep, _task: &str| {
                if calls_inner.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient".into())
                } else {
                    Ok(StepRun { output: "ok".into(), undo_ids: vec![] })
                }
            })),
        );

        let def = parse_workflow(
            "name: retry\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: flaky, description: A, max_retries: 2}]\n",
        )
        .unwrap();
        let state = engine.execute(def, false, None).await.unwrap();
        assert!(state.success());
        assert_eq!(state.step_results["a"].attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_retries_zero_runs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = Arc::clone(&calls);
        registry.register(
            "failing",
            Arc::new(FnRunner(move |_s: &WorkflowStep, _t: &str| {
                calls_inner.fetch_add(1, Ordering::SeqCst);
                Err::<StepRun, String>("nope".into())
            })),
        );

        let def = parse_workflow(
            "name: once\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: failing, description: A, max_retries: 0}]\n",
        )
        .unwrap();
        let state = engine.execute(def, false, None).await.unwrap();
        assert!(!state.success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(engine.checkpoints().exists("once"));
    }

    #[tokio::test]
    async fn step_timeout_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);

        struct SlowRunner;
        #[async_trait]
        impl AgentRunner for SlowRunner {
            async fn run(&self, _s: &WorkflowStep, _t: &str) -> Result<StepRun, String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StepRun { output: "late".into(), undo_ids: vec![] })
            }
        }
        registry.register("slow", Arc::new(SlowRunner));

        let def = parse_workflow(
            "name: slowwf\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: slow, description: A, timeout: 1}]\n",
        )
        .unwrap();
        let state = engine.execute(def, false, None).await.unwrap();
        assert!(!state.success());
        assert!(state.step_results["a"]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn false_condition_skips_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);
        registry.register("general", ok_runner());

        let def = parse_workflow(
            r#"
name: conditional
description: d
version: '1'
steps:
  - {id: a, agent: general, description: A, condition: "false"}
  - {id: b, agent: general, description: B, depends_on: [a], condition: "a.success"}
  - {id: c, agent: general, description: C}
"#,
        )
        .unwrap();
        let state = engine.execute(def, false, None).await.unwrap();
        assert!(state.step_results["a"].skipped);
        assert!(state.step_results["b"].skipped, "skip must propagate through conditions");
        assert!(state.step_results["c"].success);
        // Skips are not failures: the workflow still completes.
        assert!(state.success());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, engine) = engine(&dir);
        registry.register("general", ok_runner());

        let cancel = Arc::new(AtomicBool::new(true));
        let def = parse_workflow(
            "name: cancelled\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: general, description: A}]\n",
        )
        .unwrap();
        let state = engine.execute(def, false, Some(cancel)).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert_eq!(state.steps_completed(), 0);
        assert!(engine.checkpoints().exists("cancelled"));
    }
}
