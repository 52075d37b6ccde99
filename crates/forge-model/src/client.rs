// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenRouter-flavoured client for OpenAI-compatible chat completion APIs.
//!
//! All requests go to `{base_url}/chat/completions` with bearer auth plus the
//! OpenRouter routing headers (`HTTP-Referer`, `X-Title`).  Two modes:
//!
//! - [`OpenRouterClient::complete_once`] — single non-streaming POST with a
//!   retry/backoff loop (429 honours `Retry-After`, timeouts retry with
//!   exponential backoff, other HTTP errors fail immediately).
//! - streaming via [`ModelProvider::complete`] — SSE `data:` lines with the
//!   `[DONE]` terminator.  Chunk parse errors are counted but never abort the
//!   stream; a summary is logged when any occurred.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use forge_config::ModelConfig;

use crate::{
    error::LlmError,
    provider::ResponseStream,
    CompletionRequest, CompletionResponse, Message, MessageContent, ResponseEvent, Role,
    TokenUsage, ToolCallRequest,
};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_APP_NAME: &str = "forge";
const DEFAULT_APP_URL: &str = "https://github.com/forge-agent/forge";

pub struct OpenRouterClient {
    model: String,
    api_key: String,
    chat_url: String,
    app_name: String,
    app_url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
    retry_delay: Duration,
    client: reqwest::Client,
    usage: Mutex<TokenUsage>,
}

impl OpenRouterClient {
    pub fn new(cfg: &ModelConfig) -> Result<Self, LlmError> {
        let api_key = cfg
            .resolve_api_key()
            .ok_or_else(|| LlmError::Authentication("API key not set; set FORGE_API_KEY".into()))?;
        let base = cfg
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model: cfg.name.clone(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            app_name: cfg.app_name.clone().unwrap_or_else(|| DEFAULT_APP_NAME.into()),
            app_url: cfg.app_url.clone().unwrap_or_else(|| DEFAULT_APP_URL.into()),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .map_err(|e| LlmError::Provider(e.to_string()))?,
            usage: Mutex::new(TokenUsage::default()),
        })
    }

    /// Cumulative token usage across all requests made by this client.
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().expect("usage lock poisoned")
    }

    pub fn reset_usage(&self) {
        *self.usage.lock().expect("usage lock poisoned") = TokenUsage::default();
    }

    fn record_usage(&self, prompt: u64, completion: u64) {
        let mut u = self.usage.lock().expect("usage lock poisoned");
        u.prompt_tokens += prompt;
        u.completion_tokens += completion;
        u.requests += 1;
    }

    fn build_body(&self, req: &CompletionRequest, stream: bool) -> Value {
        let messages = build_openai_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.app_url)
            .header("X-Title", &self.app_name)
            .json(body)
    }

    /// Non-streaming completion with retry/backoff.
    ///
    /// Rate limits wait for `Retry-After` when the server provides it,
    /// otherwise exponential backoff; timeouts retry with exponential
    /// backoff; other HTTP errors fail immediately.
    pub async fn complete_once(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let body = self.build_body(req, false);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.max_retries {
            match self.try_complete(&body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => {
                    let backoff = self.retry_delay * 2u32.pow(attempt);
                    let wait = match &e {
                        LlmError::RateLimit { retry_after: Some(s), .. } => {
                            Duration::from_secs_f64(*s)
                        }
                        _ => backoff,
                    };
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        wait_secs = wait.as_secs_f64(),
                        "retryable LLM error: {e}"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Provider("request failed after retries".into())))
    }

    async fn try_complete(&self, body: &Value) -> Result<CompletionResponse, LlmError> {
        let resp = self.post(body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::Provider(e.to_string())
            }
        })?;

        let resp = check_response(resp).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Provider(format!("invalid response body: {e}")))?;

        let response = parse_completion(&v)?;
        self.record_usage(response.usage.prompt_tokens, response.usage.completion_tokens);
        debug!(
            model = %self.model,
            tokens = response.usage.total_tokens(),
            "completion finished"
        );
        Ok(response)
    }
}

#[async_trait]
impl crate::ModelProvider for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        if !req.stream {
            // Non-streaming path synthesised into the same event stream shape
            // so the agent loop has a single consumption path.
            let resp = self.complete_once(&req).await?;
            let mut events: Vec<anyhow::Result<ResponseEvent>> = Vec::new();
            if !resp.content.is_empty() {
                events.push(Ok(ResponseEvent::TextDelta(resp.content.clone())));
            }
            for (i, tc) in resp.tool_calls.iter().enumerate() {
                events.push(Ok(ResponseEvent::ToolCallDelta {
                    index: i as u32,
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                }));
            }
            if let Some(reason) = resp.finish_reason.clone() {
                events.push(Ok(ResponseEvent::FinishReason(reason)));
            }
            events.push(Ok(ResponseEvent::Usage {
                prompt_tokens: resp.usage.prompt_tokens as u32,
                completion_tokens: resp.usage.completion_tokens as u32,
            }));
            events.push(Ok(ResponseEvent::Done));
            return Ok(Box::pin(futures::stream::iter(events)));
        }

        let body = self.build_body(&req, true);
        debug!(
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending streaming completion request"
        );

        let resp = self.post(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(e.to_string())
            } else {
                LlmError::Provider(e.to_string())
            }
        })?;
        let resp = check_response(resp).await?;

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks and emit events only for complete lines.  Parse errors
        // are counted, not fatal: a malformed chunk drops that event only.
        let event_stream = byte_stream
            .scan(SseState::default(), |state, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        state.buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(state)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

#[derive(Default)]
struct SseState {
    buf: String,
    parse_errors: usize,
    valid_chunks: usize,
}

/// Drain all complete `\n`-terminated SSE lines from the buffer.
///
/// Any trailing incomplete line is left in place so it can be extended by the
/// next TCP chunk.
fn drain_complete_sse_lines(state: &mut SseState) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = state.buf.find('\n') {
        let line = state.buf[..nl_pos].trim_end_matches('\r').to_string();
        state.buf = state.buf[nl_pos + 1..].to_string();
        match parse_sse_data_line(&line) {
            SseLine::Event(ev) => {
                state.valid_chunks += 1;
                if matches!(ev, ResponseEvent::Done) && state.parse_errors > 0 {
                    warn!(
                        parse_errors = state.parse_errors,
                        valid_chunks = state.valid_chunks,
                        "stream completed with parse errors; response may be incomplete"
                    );
                }
                events.push(Ok(ev));
            }
            SseLine::ParseError => {
                state.parse_errors += 1;
            }
            SseLine::Skip => {}
        }
    }
    events
}

enum SseLine {
    Event(ResponseEvent),
    ParseError,
    Skip,
}

/// Parse a single complete SSE `data:` line.
fn parse_sse_data_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data == "[DONE]" {
        return SseLine::Event(ResponseEvent::Done);
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) => match parse_sse_chunk(&v) {
            Some(ev) => SseLine::Event(ev),
            None => SseLine::Skip,
        },
        Err(_) => SseLine::ParseError,
    }
}

fn parse_sse_chunk(v: &Value) -> Option<ResponseEvent> {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return Some(ResponseEvent::Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });
    }

    let choice = v.get("choices")?.get(0)?;

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(ResponseEvent::FinishReason(reason.to_string()));
    }

    let delta = &choice["delta"];

    // Tool call delta — each chunk carries one delta identified by "index";
    // the index routes accumulation in the collector.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        let index = tc["index"].as_u64().unwrap_or(0) as u32;
        let id = tc["id"].as_str().unwrap_or("").to_string();
        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
        let arguments = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
        return Some(ResponseEvent::ToolCallDelta { index, id, name, arguments });
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(ResponseEvent::TextDelta(text.to_string()));
        }
    }

    None
}

/// Map an HTTP error response into the [`LlmError`] taxonomy.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok());
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(LlmError::from_status(status, message, retry_after))
}

/// Parse a non-streaming completion response.
fn parse_completion(v: &Value) -> Result<CompletionResponse, LlmError> {
    let choice = v
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| LlmError::Provider("response has no choices".into()))?;
    let message = &choice["message"];

    let content = message["content"].as_str().unwrap_or("").to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCallRequest {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = TokenUsage {
        prompt_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        requests: 1,
    };

    Ok(CompletionResponse {
        content,
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        model: v["model"].as_str().map(str::to_string),
        usage,
    })
}

/// Convert a slice of [`Message`]s into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: the API requires all tool calls from one
/// assistant turn to appear inside a single assistant message as a
/// `tool_calls` array.  Internally each tool call is stored as a separate
/// message entry, so consecutive `ToolCall` messages are merged here.
fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_to_json(tool_call_id: &str, function: &crate::FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let role_str = |r: &Role| match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_calls: Vec<Value> = Vec::new();

    let flush_calls = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": std::mem::take(pending),
            }));
        }
    };

    for msg in messages {
        match &msg.content {
            MessageContent::ToolCall { tool_call_id, function } => {
                pending_calls.push(tool_call_to_json(tool_call_id, function));
            }
            MessageContent::ToolResult { tool_call_id, content } => {
                flush_calls(&mut out, &mut pending_calls);
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
            MessageContent::Text(text) => {
                flush_calls(&mut out, &mut pending_calls);
                out.push(json!({
                    "role": role_str(&msg.role),
                    "content": text,
                }));
            }
        }
    }
    flush_calls(&mut out, &mut pending_calls);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
