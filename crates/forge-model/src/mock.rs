// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted model provider for tests.
//!
//! Each queued "turn" is a list of [`ResponseEvent`]s replayed verbatim when
//! `complete` is called.  When the script runs out, an empty text turn is
//! produced so loops terminate instead of hanging.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent, ToolCallRequest};

pub struct MockProvider {
    turns: Mutex<VecDeque<Vec<ResponseEvent>>>,
    /// Number of completed `complete` calls.
    calls: Mutex<u32>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { turns: Mutex::new(VecDeque::new()), calls: Mutex::new(0) }
    }

    /// Queue a plain text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.push_events(vec![
            ResponseEvent::TextDelta(text.into()),
            ResponseEvent::FinishReason("stop".into()),
            ResponseEvent::Done,
        ]);
    }

    /// Queue a turn that requests the given tool calls.
    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        let mut events: Vec<ResponseEvent> = calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ResponseEvent::ToolCallDelta {
                index: i as u32,
                id: tc.id,
                name: tc.name,
                arguments: tc.arguments,
            })
            .collect();
        events.push(ResponseEvent::FinishReason("tool_calls".into()));
        events.push(ResponseEvent::Done);
        self.push_events(events);
    }

    /// Queue a raw event sequence.
    pub fn push_events(&self, events: Vec<ResponseEvent>) {
        self.turns.lock().expect("mock lock").push_back(events);
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().expect("mock lock")
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, _req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.calls.lock().expect("mock lock") += 1;
        let events = self
            .turns
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| {
                vec![
                    ResponseEvent::TextDelta(String::new()),
                    ResponseEvent::FinishReason("stop".into()),
                    ResponseEvent::Done,
                ]
            });
        let items: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
