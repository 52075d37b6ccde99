// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod client;
mod collector;
mod error;
mod mock;
mod provider;
mod types;

pub use client::OpenRouterClient;
pub use collector::StreamCollector;
pub use error::LlmError;
pub use mock::MockProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, CompletionResponse, FunctionCall, Message, MessageContent, ResponseEvent,
    Role, TokenUsage, ToolCallRequest, ToolSchema,
};
