// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so config fields that should be enabled unless the user
/// explicitly disables them need a named function.
fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_iterations() -> u32 {
    25
}

fn default_max_agent_tokens() -> u64 {
    500_000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_hook_timeout() -> f64 {
    10.0
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
}

/// LLM connection settings.
///
/// The API key is never stored here directly in config files checked into
/// version control — prefer `api_key_env` (default `FORGE_API_KEY`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature (0.0–2.0).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Stream responses token by token.
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Application name sent in the `X-Title` routing header.
    pub app_name: Option<String>,
    /// Application URL sent in the `HTTP-Referer` routing header.
    pub app_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "anthropic/claude-sonnet-4".into(),
            api_key_env: Some("FORGE_API_KEY".into()),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            streaming: true,
            app_name: None,
            app_url: None,
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: explicit value first, then the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        let var = self.api_key_env.as_deref().unwrap_or("FORGE_API_KEY");
        std::env::var(var).ok()
    }
}

/// Agent loop budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model ↔ tool round trips before the agent is failed with a
    /// budget-exceeded reason (infinite-loop guard).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum total tokens a single agent may consume.
    #[serde(default = "default_max_agent_tokens")]
    pub max_tokens: u64,
    /// Maximum number of agents running concurrently; excess spawns queue.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_agent_tokens(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Tool runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Maximum file size the undo store will snapshot (bytes).  Larger files
    /// still mutate but the operation is not undoable.
    #[serde(default = "ToolsConfig::default_max_snapshot_bytes")]
    pub max_snapshot_bytes: u64,
    /// Maximum undo entries retained per session.
    #[serde(default = "ToolsConfig::default_max_undo_entries")]
    pub max_undo_entries: usize,
    /// Confirmation prompt timeout in seconds; expiry defaults to DENY.
    #[serde(default = "ToolsConfig::default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
}

impl ToolsConfig {
    fn default_max_snapshot_bytes() -> u64 {
        5 * 1024 * 1024
    }
    fn default_max_undo_entries() -> usize {
        50
    }
    fn default_confirm_timeout() -> u64 {
        60
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_snapshot_bytes: Self::default_max_snapshot_bytes(),
            max_undo_entries: Self::default_max_undo_entries(),
            confirm_timeout_secs: Self::default_confirm_timeout(),
        }
    }
}

/// Hook executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Default per-hook timeout in seconds.
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: f64,
    /// Stop the hook chain at the first failing hook.
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_hook_timeout(),
            stop_on_failure: true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_config_enables_streaming() {
        let cfg = ModelConfig::default();
        assert!(cfg.streaming);
        assert_eq!(cfg.max_tokens, 4096);
    }

    #[test]
    fn resolve_api_key_prefers_explicit_value() {
        let cfg = ModelConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("FORGE_TEST_KEY_UNSET".into()),
            ..ModelConfig::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn resolve_api_key_missing_env_is_none() {
        let cfg = ModelConfig {
            api_key: None,
            api_key_env: Some("FORGE_DEFINITELY_NOT_SET_123".into()),
            ..ModelConfig::default()
        };
        assert!(cfg.resolve_api_key().is_none());
    }

    #[test]
    fn agent_defaults_are_bounded() {
        let cfg = AgentConfig::default();
        assert!(cfg.max_iterations > 0);
        assert!(cfg.max_concurrent > 0);
    }

    #[test]
    fn config_deserialises_from_partial_toml() {
        let cfg: Config = toml::from_str("[model]\nname = \"x\"\n").unwrap();
        assert_eq!(cfg.model.name, "x");
        assert_eq!(cfg.agent.max_iterations, 25);
    }

    #[test]
    fn tools_config_defaults() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.max_snapshot_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.max_undo_entries, 50);
    }
}
