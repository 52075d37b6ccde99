// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use crate::{Message, ResponseEvent, ToolCallRequest};

/// Accumulates streamed deltas into a complete assistant turn.
///
/// Tool-call fragments arrive as deltas keyed by `index`: the first delta for
/// an index supplies the id and function name plus the start of the argument
/// JSON; later deltas append argument fragments.  The finish reason is the
/// commit trigger — once set, the turn is complete.
#[derive(Debug, Default)]
pub struct StreamCollector {
    content: String,
    tool_calls: BTreeMap<u32, ToolCallRequest>,
    finish_reason: Option<String>,
    usage: Option<(u32, u32)>,
    done: bool,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed event.
    pub fn feed(&mut self, event: &ResponseEvent) {
        match event {
            ResponseEvent::TextDelta(t) => self.content.push_str(t),
            ResponseEvent::ToolCallDelta { index, id, name, arguments } => {
                let entry = self.tool_calls.entry(*index).or_insert_with(|| ToolCallRequest {
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                });
                if !id.is_empty() {
                    entry.id = id.clone();
                }
                if !name.is_empty() {
                    entry.name = name.clone();
                }
                entry.arguments.push_str(arguments);
            }
            ResponseEvent::FinishReason(r) => self.finish_reason = Some(r.clone()),
            ResponseEvent::Usage { prompt_tokens, completion_tokens } => {
                self.usage = Some((*prompt_tokens, *completion_tokens));
            }
            ResponseEvent::Done => self.done = true,
            ResponseEvent::Error(_) => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done || self.finish_reason.is_some()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Final usage statistics, if the stream reported any.
    pub fn usage(&self) -> Option<(u32, u32)> {
        self.usage
    }

    /// Tool calls in index order.
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.tool_calls.values().cloned().collect()
    }

    /// Assemble the assistant turn: the text (if any) and the tool calls in
    /// the order the model emitted them.
    pub fn into_turn(self) -> (String, Vec<ToolCallRequest>) {
        let calls = self.tool_calls.into_values().collect();
        (self.content, calls)
    }

    /// Assistant message for the text portion of the turn.
    pub fn message(&self) -> Message {
        Message::assistant(self.content.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
