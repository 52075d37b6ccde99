// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{data_dir, Config};

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(data_dir().join("config.toml"));
    paths.push(PathBuf::from(".forge/config.toml"));
    paths.push(PathBuf::from(".forge.toml"));

    paths
}

/// Load configuration by merging all discovered TOML files, then applying
/// `FORGE_*` environment overrides.  The `extra` argument may provide an
/// explicit path (e.g. a `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: toml::Value =
                toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            merge_toml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: toml::Value =
            toml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_toml(&mut merged, layer);
    }

    let mut config: Config = merged.try_into().unwrap_or_default();
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(toml::Value::Table(toml::map::Map::new()));
                merge_toml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

/// Environment variables take priority over every file layer.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(model) = std::env::var("FORGE_MODEL") {
        config.model.name = model;
    }
    if let Ok(v) = std::env::var("FORGE_MAX_TOKENS") {
        if let Ok(n) = v.parse() {
            config.model.max_tokens = n;
        }
    }
    if let Ok(v) = std::env::var("FORGE_TEMPERATURE") {
        if let Ok(t) = v.parse() {
            config.model.temperature = t;
        }
    }
    if let Ok(v) = std::env::var("FORGE_STREAMING") {
        config.model.streaming = matches!(v.as_str(), "1" | "true" | "yes");
    }
    // FORGE_API_KEY is read lazily by ModelConfig::resolve_api_key.
}

/// Expand `${ENV}` references in a string, leaving unknown variables as-is.
///
/// Used by the MCP server config and anywhere a config value may embed
/// environment references (e.g. `headers: {Authorization: "Bearer ${TOKEN}"}`).
pub fn expand_env(value: &str) -> String {
    shellexpand::env_with_context_no_errors(value, |var| std::env::var(var).ok()).into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
