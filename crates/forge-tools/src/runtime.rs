// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use forge_hooks::HookEvent;

use crate::{schema, ConfirmationRequest, ExecutionContext, ToolCall, ToolRegistry, ToolResult};

const ARGS_PREVIEW_LEN: usize = 200;

/// The tool execution pipeline.
///
/// For every call: schema validation → dry-run short-circuit → pre hooks →
/// permission gate (with ASK confirmation) → undo capture → tool body
/// (panic-trapped, outer timeout) → undo commit/discard → post hooks.
/// Exactly one [`ToolResult`] comes out; nothing propagates as a panic.
pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
    confirm_timeout: Duration,
}

impl ToolRuntime {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, confirm_timeout: Duration::from_secs(60) }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, ctx: &ExecutionContext, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::fail(format!("unknown tool: {}", call.name));
        };

        // 1. Validate arguments; defaults injected, extras preserved.
        let args = match schema::validate_args(&tool.parameters(), &call.args) {
            Ok(args) => args,
            Err(reason) => {
                return ToolResult::fail(format!("invalid arguments: {reason}"))
                    .with_metadata("validation_error", true);
            }
        };

        // 2. Dry-run short-circuits mutating tools before any side effect.
        if ctx.dry_run && tool.is_mutating() {
            return ToolResult::ok(format!(
                "[dry-run] {} would execute with arguments: {args}",
                call.name
            ))
            .with_metadata("dry_run", true);
        }

        // 3. Pre hooks may veto the call.
        if let Some(hooks) = &ctx.hooks {
            let event = HookEvent::tool_pre(&call.name, &args);
            let results = hooks.execute_hooks(&event, true).await;
            if let Some(blocked) = results.iter().find(|r| !r.should_continue()) {
                return ToolResult::fail(format!(
                    "Blocked by hook '{}' (exit code {})",
                    blocked.hook.event_pattern, blocked.exit_code
                ))
                .with_metadata("blocked_by", "hook");
            }
        }

        // 4. Permission gate.
        if let Some(checker) = &ctx.permissions {
            let decision = checker.check(&call.name, &args);
            if decision.denied() {
                return ToolResult::fail(format!("Permission denied: {}", decision.reason))
                    .with_metadata("blocked_by", "permission");
            }
            if decision.needs_confirmation() && !self.confirm(ctx, &call.name, &args).await {
                return ToolResult::fail(format!(
                    "Permission denied: user declined confirmation ({})",
                    decision.reason
                ))
                .with_metadata("blocked_by", "permission");
            }
        }

        // 5. Snapshot every path the tool declares it will touch.
        let mut captured = false;
        if tool.is_mutating() {
            if let Some(undo) = &ctx.undo {
                let paths = tool.mutated_paths(ctx, &args);
                if !paths.is_empty() {
                    let mut store = undo.lock().expect("undo store poisoned");
                    for path in &paths {
                        store.capture_before(path);
                    }
                    captured = true;
                }
            }
        }

        // 6. Execute the body on its own task so a panic becomes a failed
        //    result instead of unwinding through the agent loop.
        let mut result = {
            let tool = Arc::clone(&tool);
            let ctx_clone = ctx.clone();
            let args_clone = args.clone();
            let mut handle =
                tokio::spawn(async move { tool.execute(&ctx_clone, &args_clone).await });

            let joined = match ctx.timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), &mut handle).await {
                        Ok(j) => j,
                        Err(_) => {
                            handle.abort();
                            if captured {
                                self.discard_pending(ctx);
                            }
                            return ToolResult::fail(format!(
                                "{} timed out after {secs}s",
                                call.name
                            ))
                            .with_metadata("timeout", true);
                        }
                    }
                }
                None => handle.await,
            };

            match joined {
                Ok(result) => result,
                Err(e) => ToolResult::fail(format!("tool panicked: {e}")),
            }
        };

        // 7. Commit the undo entry on success, discard pending on failure.
        if captured {
            if result.success {
                if let Some(undo) = &ctx.undo {
                    let command = args.get("command").and_then(|v| v.as_str()).map(str::to_string);
                    let description = describe(&call.name, &args);
                    let mut store = undo.lock().expect("undo store poisoned");
                    if let Some(id) = store.commit(&call.name, &description, command) {
                        result = result.with_metadata("undo_id", id);
                    }
                }
            } else {
                self.discard_pending(ctx);
            }
        }

        // 8. Post hooks: failures are reported alongside the result but do
        //    not retroactively undo the tool.
        if let Some(hooks) = &ctx.hooks {
            let event = HookEvent::tool_post(&call.name, &args, result.success);
            let results = hooks.execute_hooks(&event, false).await;
            let failures = results.iter().filter(|r| !r.success()).count();
            if failures > 0 {
                warn!(tool = %call.name, failures, "post hooks reported failures");
                result = result.with_metadata("post_hook_failures", failures);
            }
        }

        debug!(tool = %call.name, success = result.success, "tool dispatched");
        result
    }

    fn discard_pending(&self, ctx: &ExecutionContext) {
        if let Some(undo) = &ctx.undo {
            undo.lock().expect("undo store poisoned").discard_pending();
        }
    }

    async fn confirm(&self, ctx: &ExecutionContext, tool_name: &str, args: &Value) -> bool {
        let Some(handler) = &ctx.confirm else {
            // No UI to ask — ASK without a handler defaults to deny.
            return false;
        };
        let mut preview = args.to_string();
        if preview.len() > ARGS_PREVIEW_LEN {
            preview.truncate(ARGS_PREVIEW_LEN);
            preview.push('…');
        }
        let request = ConfirmationRequest {
            tool_name: tool_name.to_string(),
            description: format!("Allow {tool_name} to run?"),
            args_preview: preview,
            timeout: self.confirm_timeout,
        };
        // The prompt has its own independent timeout; expiry denies.
        matches!(
            tokio::time::timeout(self.confirm_timeout, handler.confirm(&request)).await,
            Ok(true)
        )
    }
}

fn describe(tool_name: &str, args: &Value) -> String {
    let subject = args
        .get("file_path")
        .or_else(|| args.get("command"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if subject.is_empty() {
        tool_name.to_string()
    } else {
        let short: String = subject.chars().take(50).collect();
        if subject.chars().count() > 50 {
            format!("{tool_name}: {short}...")
        } else {
            format!("{tool_name}: {short}")
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use forge_permissions::{PermissionChecker, PermissionLevel, PermissionRule, RuleSet};
    use forge_undo::UndoStore;

    use super::*;
    use crate::{ParamType, Tool, ToolParameter};

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn category(&self) -> &str {
            "other"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _ctx: &ExecutionContext, _args: &Value) -> ToolResult {
            panic!("boom");
        }
    }

    struct TouchTool;

    #[async_trait]
    impl Tool for TouchTool {
        fn name(&self) -> &str {
            "touch"
        }
        fn description(&self) -> &str {
            "writes a marker file"
        }
        fn category(&self) -> &str {
            "file"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::new("file_path", ParamType::String, "target").required()]
        }
        fn is_mutating(&self) -> bool {
            true
        }
        fn mutated_paths(&self, _ctx: &ExecutionContext, args: &Value) -> Vec<PathBuf> {
            args.get("file_path")
                .and_then(|v| v.as_str())
                .map(|p| vec![PathBuf::from(p)])
                .unwrap_or_default()
        }
        async fn execute(&self, _ctx: &ExecutionContext, args: &Value) -> ToolResult {
            let path = args["file_path"].as_str().unwrap();
            match std::fs::write(path, "touched") {
                Ok(()) => ToolResult::ok("written"),
                Err(e) => ToolResult::fail(e.to_string()),
            }
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        fn category(&self) -> &str {
            "other"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _ctx: &ExecutionContext, _args: &Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(600)).await;
            ToolResult::ok("never")
        }
    }

    fn runtime_with(tools: Vec<Box<dyn FnOnce(&mut ToolRegistry)>>) -> ToolRuntime {
        let mut registry = ToolRegistry::new();
        for add in tools {
            add(&mut registry);
        }
        ToolRuntime::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failed_result() {
        let rt = runtime_with(vec![]);
        let out = rt
            .dispatch(
                &ExecutionContext::new("/tmp"),
                &ToolCall::new("1", "nope", json!({})),
            )
            .await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn panic_in_tool_body_becomes_failed_result() {
        let rt = runtime_with(vec![Box::new(|r| r.register(PanickyTool))]);
        let out = rt
            .dispatch(
                &ExecutionContext::new("/tmp"),
                &ToolCall::new("1", "panicky", json!({})),
            )
            .await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn validation_failure_reports_missing_parameter() {
        let rt = runtime_with(vec![Box::new(|r| r.register(TouchTool))]);
        let out = rt
            .dispatch(
                &ExecutionContext::new("/tmp"),
                &ToolCall::new("1", "touch", json!({})),
            )
            .await;
        assert!(!out.success);
        assert!(out.error.as_deref().unwrap().contains("file_path"));
    }

    #[tokio::test]
    async fn dry_run_short_circuits_mutating_tool() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("marker");
        let rt = runtime_with(vec![Box::new(|r| r.register(TouchTool))]);
        let ctx = ExecutionContext::new(dir.path()).with_dry_run(true);
        let out = rt
            .dispatch(
                &ctx,
                &ToolCall::new("1", "touch", json!({"file_path": target.to_str().unwrap()})),
            )
            .await;
        assert!(out.success);
        assert_eq!(out.metadata["dry_run"], true);
        assert!(!target.exists(), "dry-run must not touch the filesystem");
    }

    #[tokio::test]
    async fn permission_deny_blocks_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("marker");

        let mut rules = RuleSet::default();
        rules.add_rule(
            PermissionRule::new("tool:touch", PermissionLevel::Deny).with_priority(100),
        );
        let checker = Arc::new(PermissionChecker::new(rules, None).without_rate_limiting());

        let rt = runtime_with(vec![Box::new(|r| r.register(TouchTool))]);
        let ctx = ExecutionContext::new(dir.path()).with_permissions(checker);
        let out = rt
            .dispatch(
                &ctx,
                &ToolCall::new("1", "touch", json!({"file_path": target.to_str().unwrap()})),
            )
            .await;
        assert!(!out.success);
        assert_eq!(out.metadata["blocked_by"], "permission");
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn ask_without_handler_denies() {
        let checker =
            Arc::new(PermissionChecker::new(RuleSet::default(), None).without_rate_limiting());
        let rt = runtime_with(vec![Box::new(|r| r.register(TouchTool))]);
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path()).with_permissions(checker);
        let out = rt
            .dispatch(
                &ctx,
                &ToolCall::new(
                    "1",
                    "touch",
                    json!({"file_path": dir.path().join("f").to_str().unwrap()}),
                ),
            )
            .await;
        assert!(!out.success);
        assert_eq!(out.metadata["blocked_by"], "permission");
    }

    #[tokio::test]
    async fn successful_mutation_commits_undo_entry() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f.txt");
        std::fs::write(&target, "before").unwrap();

        let undo = Arc::new(Mutex::new(UndoStore::default()));
        let rt = runtime_with(vec![Box::new(|r| r.register(TouchTool))]);
        let ctx = ExecutionContext::new(dir.path()).with_undo(Arc::clone(&undo));
        let out = rt
            .dispatch(
                &ctx,
                &ToolCall::new("1", "touch", json!({"file_path": target.to_str().unwrap()})),
            )
            .await;
        assert!(out.success);
        assert!(out.metadata.contains_key("undo_id"));

        undo.lock().unwrap().undo().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "before");
    }

    #[tokio::test]
    async fn outer_timeout_kills_slow_tool() {
        let rt = runtime_with(vec![Box::new(|r| r.register(SlowTool))]);
        let ctx = ExecutionContext::new("/tmp").with_timeout(1);
        let out = rt
            .dispatch(&ctx, &ToolCall::new("1", "slow", json!({})))
            .await;
        assert!(!out.success);
        assert_eq!(out.metadata["timeout"], true);
    }
}
