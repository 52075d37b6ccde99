// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod context;
mod detector;
mod registry;
mod result;
mod runtime;
mod schema;
mod shell_manager;
mod tool;

pub use context::{ApproveAll, ConfirmationHandler, ConfirmationRequest, ExecutionContext};
pub use detector::BashFileDetector;
pub use registry::{ToolRegistry, ToolSchema};
pub use result::ToolResult;
pub use runtime::ToolRuntime;
pub use schema::{ParamType, ToolParameter};
pub use shell_manager::{ShellManager, ShellProcess, ShellStatus};
pub use tool::{Tool, ToolCall};

pub use builtin::bash::BashTool;
pub use builtin::bash_output::BashOutputTool;
pub use builtin::edit::EditTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::kill_shell::KillShellTool;
pub use builtin::read::ReadTool;
pub use builtin::web_fetch::WebFetchTool;
pub use builtin::write::WriteTool;

/// Register the full builtin tool catalog.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadTool);
    registry.register(WriteTool);
    registry.register(EditTool);
    registry.register(GlobTool);
    registry.register(GrepTool::default());
    registry.register(BashTool::default());
    registry.register(BashOutputTool);
    registry.register(KillShellTool);
    registry.register(WebFetchTool::default());
    registry
}
