// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod checker;
mod models;
mod pattern;
mod ruleset;

pub use checker::PermissionChecker;
pub use models::{tool_category, PermissionLevel, PermissionResult, PermissionRule, ToolCategory};
pub use pattern::PatternMatcher;
pub use ruleset::RuleSet;
