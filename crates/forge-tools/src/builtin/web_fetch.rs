// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutionContext, ParamType, Tool, ToolParameter, ToolResult};

/// Character cap on the returned text.
const MAX_CONTENT_CHARS: usize = 100_000;

/// Fetch a URL and return its content as text.
pub struct WebFetchTool {
    pub timeout: Duration,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "WebFetch"
    }

    fn description(&self) -> &str {
        "Fetches content from a URL.\n\
         - HTML pages are converted to readable text\n\
         - Content is capped at 100000 characters"
    }

    fn category(&self) -> &str {
        "network"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("url", ParamType::String, "The URL to fetch")
            .required()
            .length(Some(1), None)]
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
        let url = args["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::fail(format!("URL must be http(s), got '{url}'"));
        }

        debug!(url = %url, "WebFetch");
        let client = match reqwest::Client::builder().timeout(self.timeout).build() {
            Ok(c) => c,
            Err(e) => return ToolResult::fail(format!("client error: {e}")),
        };

        let resp = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ToolResult::fail(format!(
                    "Fetch timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
            Err(e) => return ToolResult::fail(format!("Fetch failed: {e}")),
        };

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::fail(format!("Cannot read response body: {e}")),
        };

        let mut text = if content_type.contains("text/html") {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };

        let mut truncated = false;
        if text.chars().count() > MAX_CONTENT_CHARS {
            text = text.chars().take(MAX_CONTENT_CHARS).collect();
            text.push_str("\n[content truncated]");
            truncated = true;
        }

        if !(200..300).contains(&status) {
            return ToolResult::fail(format!("HTTP {status} fetching {url}"))
                .with_metadata("status", status);
        }

        ToolResult::ok(text)
            .with_metadata("status", status)
            .with_metadata("content_type", content_type)
            .with_metadata("truncated", truncated)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
