// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the LLM client.
///
/// `RateLimit` and `Timeout` are retryable; everything else fails the
/// request immediately.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        /// Server-suggested wait (from the `Retry-After` header), in seconds.
        retry_after: Option<f64>,
    },

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("request timeout: {0}")]
    Timeout(String),
}

impl LlmError {
    /// Whether the retry loop should attempt this request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Timeout(_))
    }

    /// Classify an HTTP error response into the taxonomy.
    pub fn from_status(status: u16, message: String, retry_after: Option<f64>) -> Self {
        match status {
            401 | 403 => Self::Authentication(message),
            429 => Self::RateLimit { message, retry_after },
            404 => Self::ModelNotFound(message),
            400 if message.to_lowercase().contains("context") => Self::ContextLength(message),
            400 if message.to_lowercase().contains("content") => Self::ContentPolicy(message),
            _ => Self::Provider(message),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_is_authentication() {
        assert!(matches!(
            LlmError::from_status(401, "bad key".into(), None),
            LlmError::Authentication(_)
        ));
    }

    #[test]
    fn status_429_carries_retry_after() {
        match LlmError::from_status(429, "slow down".into(), Some(2.5)) {
            LlmError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Some(2.5)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_400_context_maps_to_context_length() {
        assert!(matches!(
            LlmError::from_status(400, "maximum context length exceeded".into(), None),
            LlmError::ContextLength(_)
        ));
    }

    #[test]
    fn status_400_content_maps_to_content_policy() {
        assert!(matches!(
            LlmError::from_status(400, "flagged content".into(), None),
            LlmError::ContentPolicy(_)
        ));
    }

    #[test]
    fn unknown_status_is_provider_error() {
        assert!(matches!(
            LlmError::from_status(502, "bad gateway".into(), None),
            LlmError::Provider(_)
        ));
    }

    #[test]
    fn only_rate_limit_and_timeout_are_retryable() {
        assert!(LlmError::RateLimit { message: "x".into(), retry_after: None }.is_retryable());
        assert!(LlmError::Timeout("t".into()).is_retryable());
        assert!(!LlmError::Provider("p".into()).is_retryable());
        assert!(!LlmError::Authentication("a".into()).is_retryable());
    }
}
