// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

use crate::{Agent, AgentEvent, AgentResult, AgentStatus, AgentUsage};

/// Snapshot of a managed agent for listings.
#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub usage: AgentUsage,
}

/// Aggregate statistics across all agents this manager has seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_tokens: u64,
    pub total_tool_calls: u64,
}

struct ManagedAgent {
    agent_type: String,
    status: AgentStatus,
    usage: AgentUsage,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<AgentResult>>,
    result: Option<AgentResult>,
}

/// Process-singleton registry of live agents.
///
/// A bounded semaphore caps parallel live agents; excess spawns queue for a
/// permit inside their task.
pub struct AgentManager {
    agents: Mutex<HashMap<String, ManagedAgent>>,
    permits: Arc<Semaphore>,
    stats: Mutex<ManagerStats>,
}

impl AgentManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            stats: Mutex::new(ManagerStats::default()),
        }
    }

    /// The process singleton, sized by the default agent config.
    pub fn global() -> &'static AgentManager {
        static INSTANCE: OnceLock<AgentManager> = OnceLock::new();
        INSTANCE.get_or_init(|| AgentManager::new(forge_config::AgentConfig::default().max_concurrent))
    }

    /// Spawn an agent on `task`.  Returns the agent id immediately; the run
    /// starts as soon as a concurrency permit is available.
    pub fn spawn(
        &self,
        mut agent: Agent,
        task: String,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> String {
        let id = agent.id.clone();
        let agent_type = agent.agent_type.clone();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);

        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore closed");
            let (tx, mut drain_rx) = match events {
                Some(tx) => (tx, None),
                None => {
                    let (tx, rx) = mpsc::channel(64);
                    (tx, Some(rx))
                }
            };
            // Keep an unobserved channel drained so sends never stall.
            let drain = drain_rx.take().map(|mut rx| {
                tokio::spawn(async move { while rx.recv().await.is_some() {} })
            });
            let result = agent.run(&task, tx, cancel_rx).await;
            if let Some(d) = drain {
                d.abort();
            }
            result
        });

        self.stats.lock().expect("stats poisoned").spawned += 1;
        self.agents.lock().expect("agents poisoned").insert(
            id.clone(),
            ManagedAgent {
                agent_type,
                status: AgentStatus::Pending,
                usage: AgentUsage::default(),
                cancel: Some(cancel_tx),
                task: Some(handle),
                result: None,
            },
        );
        debug!(agent = %id, "agent spawned");
        id
    }

    /// Await the agent's result.  Subsequent waits return the stored copy.
    pub async fn wait(&self, id: &str) -> Option<AgentResult> {
        let task = {
            let mut agents = self.agents.lock().expect("agents poisoned");
            let managed = agents.get_mut(id)?;
            if let Some(result) = &managed.result {
                return Some(result.clone());
            }
            managed.task.take()
        };

        let result = match task {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => AgentResult {
                    success: false,
                    message: String::new(),
                    error: Some(format!("agent task panicked: {e}")),
                    status: AgentStatus::Failed,
                    usage: AgentUsage::default(),
                },
            },
            // Another waiter holds the handle; poll for its stored result.
            None => loop {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                let agents = self.agents.lock().expect("agents poisoned");
                if let Some(result) = agents.get(id).and_then(|m| m.result.clone()) {
                    break result;
                }
            },
        };

        let mut agents = self.agents.lock().expect("agents poisoned");
        if let Some(managed) = agents.get_mut(id) {
            managed.status = result.status;
            managed.usage = result.usage;
            managed.result = Some(result.clone());
        }
        drop(agents);

        let mut stats = self.stats.lock().expect("stats poisoned");
        match result.status {
            AgentStatus::Completed => stats.completed += 1,
            AgentStatus::Failed => stats.failed += 1,
            AgentStatus::Cancelled => stats.cancelled += 1,
            _ => {}
        }
        stats.total_tokens += result.usage.tokens_used;
        stats.total_tool_calls += result.usage.tool_calls as u64;

        Some(result)
    }

    /// Signal cancellation.  The agent transitions to CANCELLED at its next
    /// suspension point; callers still `wait` for the final result.
    pub fn cancel(&self, id: &str) -> bool {
        let mut agents = self.agents.lock().expect("agents poisoned");
        match agents.get_mut(id).and_then(|m| m.cancel.take()) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<AgentSummary> {
        let agents = self.agents.lock().expect("agents poisoned");
        let mut out: Vec<AgentSummary> = agents
            .iter()
            .map(|(id, m)| AgentSummary {
                id: id.clone(),
                agent_type: m.agent_type.clone(),
                status: m.status,
                usage: m.usage,
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn stats(&self) -> ManagerStats {
        *self.stats.lock().expect("stats poisoned")
    }

    /// Test-only: drop every record (running tasks keep their permits until
    /// they finish).
    pub fn reset(&self) {
        self.agents.lock().expect("agents poisoned").clear();
        *self.stats.lock().expect("stats poisoned") = ManagerStats::default();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
