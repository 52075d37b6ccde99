// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use forge_config::expand_env;

use crate::McpError;

fn default_true() -> bool {
    true
}

fn default_transport() -> String {
    "stdio".into()
}

/// Configuration for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Command for stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint for http transport.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

impl McpServerConfig {
    pub fn validate(&self) -> Result<(), McpError> {
        match self.transport.as_str() {
            "stdio" => {
                if self.command.is_none() {
                    return Err(McpError::Protocol(format!(
                        "server {}: stdio transport requires command",
                        self.name
                    )));
                }
            }
            "http" => {
                if self.url.is_none() {
                    return Err(McpError::Protocol(format!(
                        "server {}: http transport requires url",
                        self.name
                    )));
                }
            }
            other => {
                return Err(McpError::Protocol(format!(
                    "server {}: transport must be 'stdio' or 'http', got '{other}'",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Expand `${ENV}` references in every string field.
    fn expand(&mut self) {
        if let Some(c) = &self.command {
            self.command = Some(expand_env(c));
        }
        self.args = self.args.iter().map(|a| expand_env(a)).collect();
        if let Some(u) = &self.url {
            self.url = Some(expand_env(u));
        }
        self.headers = self.headers.iter().map(|(k, v)| (k.clone(), expand_env(v))).collect();
        self.env = self.env.iter().map(|(k, v)| (k.clone(), expand_env(v))).collect();
        if let Some(c) = &self.cwd {
            self.cwd = Some(expand_env(c));
        }
    }
}

/// Global MCP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "McpSettings::default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "McpSettings::default_reconnect_delay")]
    pub reconnect_delay: u64,
    #[serde(default = "McpSettings::default_timeout")]
    pub timeout: u64,
}

impl McpSettings {
    fn default_reconnect_attempts() -> u32 {
        3
    }
    fn default_reconnect_delay() -> u64 {
        5
    }
    fn default_timeout() -> u64 {
        30
    }
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            reconnect_attempts: 3,
            reconnect_delay: 5,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    servers: HashMap<String, McpServerConfig>,
    #[serde(default)]
    settings: Option<McpSettings>,
}

/// Parsed MCP configuration: user-level `~/.forge/mcp.yaml` merged with a
/// project-level `.forge/mcp.yaml` (project entries win on name clashes).
#[derive(Debug, Clone, Default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
    pub settings: McpSettings,
}

impl McpConfig {
    pub fn parse(yaml: &str) -> Result<Self, McpError> {
        let raw: RawConfig = serde_yaml::from_str(yaml)
            .map_err(|e| McpError::Protocol(format!("invalid mcp config: {e}")))?;
        let mut servers: Vec<McpServerConfig> = raw
            .servers
            .into_iter()
            .map(|(name, mut cfg)| {
                cfg.name = name;
                cfg.expand();
                cfg
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        for server in &servers {
            server.validate()?;
        }
        Ok(Self { servers, settings: raw.settings.unwrap_or_default() })
    }

    /// Load and merge the user-level and project-level config files.
    /// Missing files contribute nothing.
    pub fn load(user_path: &Path, project_path: Option<&Path>) -> Result<Self, McpError> {
        let mut merged = Self::default();
        for path in [Some(user_path), project_path].into_iter().flatten() {
            let Ok(text) = std::fs::read_to_string(path) else { continue };
            debug!(path = %path.display(), "loading mcp config layer");
            let layer = Self::parse(&text)?;
            for server in layer.servers {
                merged.servers.retain(|s| s.name != server.name);
                merged.servers.push(server);
            }
            merged.settings = layer.settings;
        }
        merged.servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(merged)
    }

    pub fn get(&self, name: &str) -> Option<&McpServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Enabled servers marked for auto-connection.
    pub fn auto_connect_servers(&self) -> Vec<&McpServerConfig> {
        self.servers.iter().filter(|s| s.enabled && s.auto_connect).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
