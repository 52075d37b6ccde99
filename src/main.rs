// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, McpCommands, SessionCommands, WorkflowCommands};
use forge_core::{Agent, AgentEvent, SessionDocument, SessionStore};
use forge_model::{ModelProvider, OpenRouterClient};
use forge_permissions::PermissionChecker;
use forge_tools::{builtin_registry, ExecutionContext, ToolCall, ToolRuntime};
use forge_undo::UndoStore;
use forge_workflows::{
    parse_workflow_file, AgentRunnerRegistry, CheckpointStore, StepRun, WorkflowEngine,
    WorkflowStep,
};

/// Exit codes: 0 success, 1 generic failure, 3 blocked by permission,
/// 4 blocked by hook.
const EXIT_PERMISSION_BLOCKED: i32 = 3;
const EXIT_HOOK_BLOCKED: i32 = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = forge_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { task, agent, workdir, session, dry_run } => {
            run_agent(&config, &task, &agent, workdir, session, dry_run).await
        }
        Commands::Tool { name, args, workdir } => run_tool(&name, &args, workdir).await,
        Commands::Workflow { command } => run_workflow_command(&config, command).await,
        Commands::Session { command } => run_session_command(command),
        Commands::Mcp { command } => run_mcp_command(command).await,
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn working_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn execution_context(workdir: PathBuf) -> ExecutionContext {
    let permissions = Arc::new(PermissionChecker::from_config(
        &forge_config::data_dir().join("permissions.json"),
        Some(&workdir),
    ));
    ExecutionContext::new(workdir)
        .with_undo(Arc::new(Mutex::new(UndoStore::default())))
        .with_permissions(permissions)
}

fn system_prompt_for(agent_type: &str) -> String {
    let role = match agent_type {
        "plan" => "You plan work before any code changes: produce a concrete, ordered plan.",
        "review" => "You review code changes for correctness, style and safety.",
        _ => "You are a capable software engineering agent.",
    };
    format!(
        "{role}\nUse the available tools to inspect and modify the project. \
         Prefer small, verifiable steps; report what you did and why."
    )
}

async fn run_agent(
    config: &forge_config::Config,
    task: &str,
    agent_type: &str,
    workdir: Option<PathBuf>,
    session: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let model: Arc<dyn ModelProvider> =
        Arc::new(OpenRouterClient::new(&config.model).context("configuring model client")?);
    let runtime = Arc::new(ToolRuntime::new(Arc::new(builtin_registry())));

    let store = SessionStore::default_location();
    let mut doc = match &session {
        Some(id) => store.resume(id)?,
        None => SessionDocument::new(task.chars().take(60).collect::<String>()),
    };

    let ctx = execution_context(working_dir(workdir))
        .with_dry_run(dry_run)
        .with_session_id(doc.id.clone());

    let mut agent = Agent::new(
        agent_type,
        model,
        runtime,
        ctx,
        config.agent.clone(),
        system_prompt_for(agent_type),
    );
    if !doc.messages.is_empty() {
        agent.seed_history(doc.messages.clone());
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentEvent>(64);
    let printer = tokio::spawn(async move {
        use std::io::Write;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextDelta(t) => {
                    print!("{t}");
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCallStarted { tool_name, .. } => {
                    eprintln!("[tool] {tool_name} ...");
                }
                AgentEvent::ToolCallFinished { tool_name, is_error, .. } => {
                    eprintln!("[tool] {tool_name} {}", if is_error { "failed" } else { "ok" });
                }
                _ => {}
            }
        }
    });

    let (_cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    let result = agent.run(task, tx, cancel_rx).await;
    let _ = printer.await;
    println!();

    doc.messages = agent.history().to_vec();
    doc.tracker.turn_count += 1;
    store.save(&doc)?;
    eprintln!("[session {}]", doc.id);

    if !result.success {
        anyhow::bail!(
            "agent {}: {}",
            result.status.as_str(),
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_tool(name: &str, args: &str, workdir: Option<PathBuf>) -> anyhow::Result<()> {
    let args: serde_json::Value = serde_json::from_str(args).context("parsing --args")?;
    let runtime = ToolRuntime::new(Arc::new(builtin_registry()));
    let ctx = execution_context(working_dir(workdir));

    let result = runtime.dispatch(&ctx, &ToolCall::new("cli", name, args)).await;
    println!("{}", result.display_text());

    if !result.success {
        // Distinct exit codes so scripts can tell a policy block from a
        // tool-internal error.
        let code = match result.metadata.get("blocked_by").and_then(|v| v.as_str()) {
            Some("permission") => EXIT_PERMISSION_BLOCKED,
            Some("hook") => EXIT_HOOK_BLOCKED,
            _ => 1,
        };
        std::process::exit(code);
    }
    Ok(())
}

async fn run_workflow_command(
    config: &forge_config::Config,
    command: WorkflowCommands,
) -> anyhow::Result<()> {
    match command {
        WorkflowCommands::Validate { file } => {
            let definition = parse_workflow_file(&file)?;
            forge_workflows::WorkflowGraph::from_definition(&definition)?;
            println!("ok: {} ({} steps)", definition.name, definition.steps.len());
            Ok(())
        }
        WorkflowCommands::Run { file, resume } => {
            let definition = parse_workflow_file(&file)?;
            let registry = Arc::new(AgentRunnerRegistry::new());
            register_agent_runner(&registry, config.clone())?;

            let engine = WorkflowEngine::new(registry, CheckpointStore::default_location());
            let state = engine.execute(definition, resume, None).await?;
            println!(
                "workflow {}: {:?} ({} completed, {} failed, {} skipped)",
                state.definition.name,
                state.status,
                state.steps_completed(),
                state.steps_failed(),
                state.steps_skipped()
            );
            if !state.success() {
                std::process::exit(1);
            }
            Ok(())
        }
        WorkflowCommands::Status { name } => {
            let checkpoints = CheckpointStore::default_location();
            match checkpoints.load(&name) {
                Ok(state) => {
                    println!(
                        "{}: {:?}, {} of {} steps recorded",
                        name,
                        state.status,
                        state.step_results.len(),
                        state.definition.steps.len()
                    );
                    for (id, result) in &state.step_results {
                        let outcome = if result.skipped {
                            "skipped"
                        } else if result.success {
                            "ok"
                        } else {
                            "failed"
                        };
                        println!("  {id}: {outcome}");
                    }
                }
                Err(_) => println!("{name}: no checkpoint (not running or completed cleanly)"),
            }
            Ok(())
        }
    }
}

/// Workflow steps drive real agents through the agent manager.
fn register_agent_runner(
    registry: &Arc<AgentRunnerRegistry>,
    config: forge_config::Config,
) -> anyhow::Result<()> {
    struct LiveRunner {
        config: forge_config::Config,
        model: Arc<dyn ModelProvider>,
    }

    #[async_trait::async_trait]
    impl forge_workflows::AgentRunner for LiveRunner {
        async fn run(&self, step: &WorkflowStep, task: &str) -> Result<StepRun, String> {
            let runtime = Arc::new(ToolRuntime::new(Arc::new(builtin_registry())));
            let ctx = execution_context(working_dir(None));
            let agent = Agent::new(
                step.agent.clone(),
                Arc::clone(&self.model),
                runtime,
                ctx,
                self.config.agent.clone(),
                system_prompt_for(&step.agent),
            );

            // Collect the undo entries this step commits so the workflow's
            // rollback checkpoints can replay them.
            let (tx, mut rx) = tokio::sync::mpsc::channel::<AgentEvent>(64);
            let collector = tokio::spawn(async move {
                let mut undo_ids = Vec::new();
                while let Some(event) = rx.recv().await {
                    if let AgentEvent::ToolCallFinished { undo_id: Some(id), .. } = event {
                        undo_ids.push(id);
                    }
                }
                undo_ids
            });

            let manager = forge_core::AgentManager::global();
            let id = manager.spawn(agent, task.to_string(), Some(tx));
            let result = manager.wait(&id).await.ok_or("agent vanished")?;
            let undo_ids = collector.await.unwrap_or_default();

            if result.success {
                Ok(StepRun { output: result.message, undo_ids })
            } else {
                Err(result.error.unwrap_or_else(|| "agent failed".into()))
            }
        }
    }

    let model: Arc<dyn ModelProvider> =
        Arc::new(OpenRouterClient::new(&config.model).context("configuring model client")?);
    let runner = Arc::new(LiveRunner { config, model });
    for agent_type in ["general", "plan", "review"] {
        registry.register(agent_type, runner.clone());
    }
    Ok(())
}

fn run_session_command(command: SessionCommands) -> anyhow::Result<()> {
    let store = SessionStore::default_location();
    match command {
        SessionCommands::List => {
            for id in store.list() {
                println!("{id}");
            }
            Ok(())
        }
        SessionCommands::Show { id } => {
            let doc = store.resume(&id)?;
            println!("# {} ({} messages)", doc.title, doc.messages.len());
            for message in &doc.messages {
                if let Some(text) = message.as_text() {
                    println!("[{:?}] {text}", message.role);
                }
            }
            Ok(())
        }
        SessionCommands::Delete { id } => {
            store.delete(&id)?;
            Ok(())
        }
    }
}

async fn run_mcp_command(command: McpCommands) -> anyhow::Result<()> {
    let project = std::env::current_dir().ok().map(|d| d.join(".forge").join("mcp.yaml"));
    let config = forge_mcp::McpConfig::load(
        &forge_config::data_dir().join("mcp.yaml"),
        project.as_deref(),
    )?;

    match command {
        McpCommands::List => {
            for server in &config.servers {
                println!(
                    "{} ({}, {})",
                    server.name,
                    server.transport,
                    if server.enabled { "enabled" } else { "disabled" }
                );
            }
            Ok(())
        }
        McpCommands::Tools { server } => {
            let client = connect(&config, &server).await?;
            for tool in client.list_tools().await? {
                println!("{}: {}", tool.name, tool.description);
            }
            client.disconnect().await;
            Ok(())
        }
        McpCommands::Call { server, tool, args } => {
            let args: serde_json::Value = serde_json::from_str(&args).context("parsing --args")?;
            let client = connect(&config, &server).await?;
            let content = client.call_tool(&tool, args).await?;
            for part in content {
                println!("{}", serde_json::to_string_pretty(&part)?);
            }
            client.disconnect().await;
            Ok(())
        }
    }
}

async fn connect(
    config: &forge_mcp::McpConfig,
    server: &str,
) -> anyhow::Result<forge_mcp::McpClient> {
    let cfg = config
        .get(server)
        .with_context(|| format!("no MCP server named '{server}' configured"))?;

    let transport: Arc<dyn forge_mcp::McpTransport> = match cfg.transport.as_str() {
        "http" => Arc::new(forge_mcp::HttpTransport::new(
            cfg.url.clone().unwrap_or_default(),
            cfg.headers.clone().into_iter().collect(),
        )),
        _ => Arc::new(forge_mcp::StdioTransport::new(
            cfg.command.clone().unwrap_or_default(),
            cfg.args.clone(),
            cfg.env.clone(),
            cfg.cwd.clone(),
        )),
    };

    let client = forge_mcp::McpClient::new(transport)
        .with_request_timeout(std::time::Duration::from_secs(config.settings.timeout));
    client.connect().await?;
    Ok(client)
}
