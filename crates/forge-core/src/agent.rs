// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use forge_config::AgentConfig;
use forge_model::{
    CompletionRequest, Message, ModelProvider, StreamCollector, ToolCallRequest, ToolSchema,
};
use forge_tools::{ExecutionContext, ToolCall, ToolRuntime};

use crate::AgentEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-agent resource accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentUsage {
    pub tokens_used: u64,
    pub tool_calls: u32,
    pub iterations: u32,
    pub time_seconds: f64,
}

/// Final outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    /// The agent's final text answer.
    pub message: String,
    pub error: Option<String>,
    pub status: AgentStatus,
    pub usage: AgentUsage,
}

impl AgentResult {
    fn completed(message: String, usage: AgentUsage) -> Self {
        Self { success: true, message, error: None, status: AgentStatus::Completed, usage }
    }

    fn failed(reason: String, usage: AgentUsage) -> Self {
        Self {
            success: false,
            message: String::new(),
            error: Some(reason),
            status: AgentStatus::Failed,
            usage,
        }
    }

    fn cancelled(partial: String, usage: AgentUsage) -> Self {
        Self {
            success: false,
            message: partial,
            error: Some("cancelled".into()),
            status: AgentStatus::Cancelled,
            usage,
        }
    }
}

/// A single-purpose model-driven loop: stream a turn, execute the requested
/// tools in the order the model emitted them, append the results, repeat
/// until the model answers without tool calls or a budget runs out.
pub struct Agent {
    pub id: String,
    pub agent_type: String,
    model: Arc<dyn ModelProvider>,
    runtime: Arc<ToolRuntime>,
    ctx: ExecutionContext,
    config: AgentConfig,
    system_prompt: String,
    history: Vec<Message>,
    status: AgentStatus,
    usage: AgentUsage,
}

impl Agent {
    pub fn new(
        agent_type: impl Into<String>,
        model: Arc<dyn ModelProvider>,
        runtime: Arc<ToolRuntime>,
        ctx: ExecutionContext,
        config: AgentConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_type: agent_type.into(),
            model,
            runtime,
            ctx,
            config,
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            status: AgentStatus::Pending,
            usage: AgentUsage::default(),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn usage(&self) -> AgentUsage {
        self.usage
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Pre-load prior conversation turns before `run`.
    pub fn seed_history(&mut self, messages: Vec<Message>) {
        self.history = messages;
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.runtime
            .registry()
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    /// Run the loop for one task.  Events stream through `events`; dropping
    /// the receiver is fine.  Sending on `cancel` (or dropping its sender)
    /// aborts at the next suspension point.
    pub async fn run(
        &mut self,
        task: &str,
        events: mpsc::Sender<AgentEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> AgentResult {
        let started = Instant::now();
        self.status = AgentStatus::Running;

        if self.history.is_empty() {
            self.history.push(Message::system(self.system_prompt.clone()));
        }
        self.history.push(Message::user(task));

        let result = self.drive_loop(&events, &mut cancel).await;

        self.usage.time_seconds = started.elapsed().as_secs_f64();
        let mut result = result;
        result.usage = self.usage;
        self.status = result.status;

        match result.status {
            AgentStatus::Failed => {
                let _ = events
                    .send(AgentEvent::Failed {
                        reason: result.error.clone().unwrap_or_default(),
                    })
                    .await;
            }
            AgentStatus::Cancelled => {
                let _ = events
                    .send(AgentEvent::Cancelled { partial_text: result.message.clone() })
                    .await;
            }
            _ => {
                let _ = events.send(AgentEvent::TurnComplete).await;
            }
        }
        result
    }

    async fn drive_loop(
        &mut self,
        events: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> AgentResult {
        let mut partial_text = String::new();

        loop {
            if cancelled(cancel) {
                return AgentResult::cancelled(partial_text, self.usage);
            }

            self.usage.iterations += 1;
            if self.usage.iterations > self.config.max_iterations {
                return AgentResult::failed(
                    format!(
                        "budget exceeded: more than {} iterations",
                        self.config.max_iterations
                    ),
                    self.usage,
                );
            }
            if self.usage.tokens_used > self.config.max_tokens {
                return AgentResult::failed(
                    format!("budget exceeded: more than {} tokens", self.config.max_tokens),
                    self.usage,
                );
            }

            let request = CompletionRequest {
                messages: self.history.clone(),
                tools: self.tool_schemas(),
                stream: true,
            };

            let turn = tokio::select! {
                biased;
                _ = &mut *cancel => None,
                streamed = self.stream_turn(request, events) => Some(streamed),
            };

            let (text, tool_calls) = match turn {
                None => return AgentResult::cancelled(partial_text, self.usage),
                Some(Err(e)) => return AgentResult::failed(format!("model error: {e}"), self.usage),
                Some(Ok(t)) => t,
            };

            if !text.is_empty() {
                partial_text.push_str(&text);
                self.history.push(Message::assistant(text.clone()));
            }

            if tool_calls.is_empty() {
                debug!(agent = %self.id, "turn complete without tool calls");
                return AgentResult::completed(text, self.usage);
            }

            // Tool calls execute sequentially, in the order the model
            // emitted them; their result messages append in the same order.
            for tc in &tool_calls {
                self.history.push(Message::tool_call(&tc.id, &tc.name, &tc.arguments));
            }
            for tc in &tool_calls {
                if cancelled(cancel) {
                    return AgentResult::cancelled(partial_text, self.usage);
                }
                let _ = events
                    .send(AgentEvent::ToolCallStarted {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                    })
                    .await;

                let (output, is_error, undo_id) = self.execute_tool(tc).await;
                self.usage.tool_calls += 1;

                let _ = events
                    .send(AgentEvent::ToolCallFinished {
                        call_id: tc.id.clone(),
                        tool_name: tc.name.clone(),
                        output: output.clone(),
                        is_error,
                        undo_id,
                    })
                    .await;
                self.history.push(Message::tool_result(&tc.id, &output));
            }
        }
    }

    /// Stream one model turn through a collector.
    async fn stream_turn(
        &mut self,
        request: CompletionRequest,
        events: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<(String, Vec<ToolCallRequest>)> {
        let mut stream = self.model.complete(request).await?;
        let mut collector = StreamCollector::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(ev) => {
                    if let forge_model::ResponseEvent::TextDelta(t) = &ev {
                        if !t.is_empty() {
                            let _ = events.send(AgentEvent::TextDelta(t.clone())).await;
                        }
                    }
                    if let forge_model::ResponseEvent::Usage {
                        prompt_tokens,
                        completion_tokens,
                    } = &ev
                    {
                        self.usage.tokens_used += (*prompt_tokens + *completion_tokens) as u64;
                    }
                    let done = matches!(ev, forge_model::ResponseEvent::Done);
                    collector.feed(&ev);
                    if done {
                        break;
                    }
                }
                Err(e) => {
                    // Recoverable stream noise is logged, not fatal.
                    warn!(agent = %self.id, "stream error: {e}");
                }
            }
        }

        Ok(collector.into_turn())
    }

    /// Dispatch one tool call.  Returns the model-facing text, the error
    /// flag, and the committed undo id (if any) — a tool failure is a
    /// message the model may react to, never a loop abort.
    async fn execute_tool(&self, tc: &ToolCallRequest) -> (String, bool, Option<String>) {
        let args: Value = if tc.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&tc.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return (format!("invalid tool arguments (not valid JSON): {e}"), true, None);
                }
            }
        };

        let call = ToolCall::new(&tc.id, &tc.name, args);
        let result = self.runtime.dispatch(&self.ctx, &call).await;
        let undo_id = result
            .metadata
            .get("undo_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        (result.display_text().to_string(), !result.success, undo_id)
    }
}

fn cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    // An explicit send AND a dropped sender both count as cancellation.
    !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
