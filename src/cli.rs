// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// forge — an agentic coding assistant core.
#[derive(Parser, Debug)]
#[command(name = "forge", version, about)]
pub struct Cli {
    /// Path to an explicit config file (overrides the search path).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter, default info).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a one-shot agent on a task and print its answer.
    Run {
        /// The task for the agent.
        task: String,
        /// Agent type (system prompt profile).
        #[arg(long, default_value = "general")]
        agent: String,
        /// Working directory for tool execution.
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Resume an existing session by id.
        #[arg(long)]
        session: Option<String>,
        /// Validate mutating tools without touching the filesystem.
        #[arg(long)]
        dry_run: bool,
    },

    /// Execute a single tool directly with JSON arguments.
    Tool {
        /// Tool name (Read, Write, Edit, Glob, Grep, Bash, …).
        name: String,
        /// JSON argument object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Working directory for the tool.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Workflow management.
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Session management.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// MCP server inspection.
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },

    /// Print the effective configuration and exit.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// Validate a workflow definition without executing it.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },
    /// Run a workflow from a YAML file.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,
        /// Resume from the retained checkpoint instead of starting fresh.
        #[arg(long)]
        resume: bool,
    },
    /// Show the checkpoint status of a workflow.
    Status {
        /// Workflow name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// List stored sessions.
    List,
    /// Print a stored session.
    Show {
        /// Session id.
        id: String,
    },
    /// Delete a stored session.
    Delete {
        /// Session id.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// List configured servers.
    List,
    /// Connect to a configured server and list its tools.
    Tools {
        /// Server name from mcp.yaml.
        server: String,
    },
    /// Call a tool on a configured server.
    Call {
        /// Server name from mcp.yaml.
        server: String,
        /// Tool name.
        tool: String,
        /// JSON argument object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}
