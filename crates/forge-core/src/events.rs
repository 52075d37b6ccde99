// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Events streamed from a running agent to its caller (UI or workflow step).
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Incremental model text.
    TextDelta(String),
    /// A tool call is about to execute.
    ToolCallStarted { call_id: String, tool_name: String },
    /// A tool call finished; `output` is the model-facing text.
    /// `undo_id` carries the committed undo entry when the call was a
    /// snapshotted mutation, so callers (e.g. workflow steps) can record
    /// it for rollback.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        undo_id: Option<String>,
    },
    /// One model turn completed without tool calls — the agent is done.
    TurnComplete,
    /// The agent failed (budget exhaustion or a fatal model error).
    Failed { reason: String },
    /// The agent was cancelled; any streamed text so far is in `partial_text`.
    Cancelled { partial_text: String },
}
