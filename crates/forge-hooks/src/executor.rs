// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Hook, HookEvent, HookRegistry};

/// Maximum number of results kept per `execute_hooks` call; excess hooks
/// are dropped with a log line.
const MAX_RESULTS: usize = 100;

/// Environment variables hooks are never allowed to override.
/// Interpreter/loader injection vectors and TLS/privilege knobs.
const DANGEROUS_ENV_VARS: &[&str] = &[
    // Dynamic linker
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    // Python
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PYTHONHOME",
    // Ruby
    "RUBYLIB",
    "RUBYOPT",
    // Perl
    "PERL5LIB",
    "PERL5OPT",
    // Node.js
    "NODE_PATH",
    "NODE_OPTIONS",
    // Shell startup
    "BASH_ENV",
    "ENV",
    "ZDOTDIR",
    // Privilege escalation
    "SUDO_ASKPASS",
    // TLS trust
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "REQUESTS_CA_BUNDLE",
    "CURL_CA_BUNDLE",
    // Git
    "GIT_EXEC_PATH",
    "GIT_TEMPLATE_DIR",
    // Word splitting / path search
    "IFS",
    "CDPATH",
];

/// Result of one hook execution.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub hook: Hook,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl HookResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.error.is_none()
    }

    /// For pre-execution hooks: false blocks the gated operation.
    pub fn should_continue(&self) -> bool {
        self.success()
    }
}

/// Executes hooks in response to events: sanitised environment, per-hook
/// timeout, block-on-nonzero semantics.
pub struct HookExecutor {
    registry: Arc<HookRegistry>,
    default_timeout: Duration,
    working_dir: PathBuf,
}

impl HookExecutor {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry,
            default_timeout: Duration::from_secs(10),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Execute all hooks matching the event, sequentially in declaration
    /// order.  With `stop_on_failure` the chain halts at the first result
    /// whose `should_continue()` is false.
    pub async fn execute_hooks(&self, event: &HookEvent, stop_on_failure: bool) -> Vec<HookResult> {
        let hooks = self.registry.matching(&event.name);
        if hooks.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::new();
        for hook in hooks {
            let result = self.execute_hook(&hook, event).await;

            if result.success() {
                debug!(
                    pattern = %hook.event_pattern,
                    exit = result.exit_code,
                    secs = result.duration.as_secs_f64(),
                    "hook succeeded"
                );
            } else {
                warn!(
                    pattern = %hook.event_pattern,
                    exit = result.exit_code,
                    timed_out = result.timed_out,
                    "hook failed"
                );
            }

            let blocked = !result.should_continue();
            results.push(result);

            if stop_on_failure && blocked {
                debug!(pattern = %hook.event_pattern, "hook blocked operation");
                break;
            }
            if results.len() >= MAX_RESULTS {
                warn!(limit = MAX_RESULTS, "hook results limit reached, skipping remaining hooks");
                break;
            }
        }
        results
    }

    async fn execute_hook(&self, hook: &Hook, event: &HookEvent) -> HookResult {
        let start = Instant::now();

        let work_dir = hook
            .working_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.to_string_lossy().into_owned());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&hook.command);
        cmd.current_dir(&work_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Event variables first, then the hook's own env — minus anything on
        // the deny-list, even when the user set it on purpose.
        for (key, value) in &event.env {
            cmd.env(key, value);
        }
        cmd.env("FORGE_WORKING_DIR", &work_dir);
        for (key, value) in &hook.env {
            if DANGEROUS_ENV_VARS.contains(&key.to_uppercase().as_str()) {
                warn!(
                    pattern = %hook.event_pattern,
                    var = %key,
                    "hook attempted to set dangerous env var - blocked"
                );
                continue;
            }
            cmd.env(key, value);
        }

        let timeout = hook
            .timeout_secs
            .map(Duration::from_secs_f64)
            .unwrap_or(self.default_timeout);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return HookResult {
                    hook: hook.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    timed_out: false,
                    error: Some(format!("failed to execute hook: {e}")),
                };
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => HookResult {
                hook: hook.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                duration: start.elapsed(),
                timed_out: false,
                error: None,
            },
            Ok(Err(e)) => HookResult {
                hook: hook.clone(),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                duration: start.elapsed(),
                timed_out: false,
                error: Some(format!("failed to execute hook: {e}")),
            },
            Err(_) => {
                // wait_with_output consumed the child handle; kill_on_drop
                // delivers SIGKILL when the timed-out future is dropped.
                HookResult {
                    hook: hook.clone(),
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    timed_out: true,
                    error: Some(format!("hook timed out after {}s", timeout.as_secs_f64())),
                }
            }
        }
    }
}

/// Convenience: fire an event through an executor.
pub async fn fire_event(
    executor: &HookExecutor,
    event: &HookEvent,
    stop_on_failure: bool,
) -> Vec<HookResult> {
    executor.execute_hooks(event, stop_on_failure).await
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn executor_with(hooks: Vec<Hook>) -> HookExecutor {
        let registry = Arc::new(HookRegistry::new());
        for h in hooks {
            registry.register(h);
        }
        HookExecutor::new(registry)
    }

    #[tokio::test]
    async fn hook_runs_and_captures_stdout() {
        let ex = executor_with(vec![Hook::new("tool:Bash:pre", "echo hello-from-hook")]);
        let results = ex
            .execute_hooks(&HookEvent::new("tool:Bash:pre"), true)
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success());
        assert!(results[0].stdout.contains("hello-from-hook"));
    }

    #[tokio::test]
    async fn event_env_is_visible_to_hook() {
        let ex = executor_with(vec![Hook::new("custom", "echo $FORGE_TOOL_NAME")]);
        let event = HookEvent::new("custom").with_env("FORGE_TOOL_NAME", "Bash");
        let results = ex.execute_hooks(&event, true).await;
        assert!(results[0].stdout.contains("Bash"));
    }

    #[tokio::test]
    async fn forge_working_dir_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let mut hook = Hook::new("e", "echo $FORGE_WORKING_DIR");
        hook.working_dir = Some(dir.path().to_string_lossy().into_owned());
        let ex = executor_with(vec![hook]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert!(results[0].stdout.trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }

    #[tokio::test]
    async fn dangerous_env_vars_are_blocked() {
        let mut hook = Hook::new("e", "echo \"preload=[$LD_PRELOAD]\"");
        hook.env.insert("LD_PRELOAD".into(), "/tmp/evil.so".into());
        hook.env.insert("SAFE_VAR".into(), "ok".into());
        let ex = executor_with(vec![hook]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert!(
            !results[0].stdout.contains("evil.so"),
            "LD_PRELOAD must not reach the child: {}",
            results[0].stdout
        );
    }

    #[tokio::test]
    async fn deny_list_is_case_insensitive() {
        let mut hook = Hook::new("e", "echo \"np=[$NODE_OPTIONS]\"");
        hook.env.insert("node_options".into(), "--require evil".into());
        let ex = executor_with(vec![hook]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert!(!results[0].stdout.contains("evil"));
    }

    #[tokio::test]
    async fn safe_hook_env_passes_through() {
        let mut hook = Hook::new("e", "echo $MY_HOOK_VAR");
        hook.env.insert("MY_HOOK_VAR".into(), "custom-value".into());
        let ex = executor_with(vec![hook]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert!(results[0].stdout.contains("custom-value"));
    }

    #[tokio::test]
    async fn nonzero_exit_blocks_chain_with_stop_on_failure() {
        let ex = executor_with(vec![
            Hook::new("e", "exit 3"),
            Hook::new("e", "echo never-reached"),
        ]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exit_code, 3);
        assert!(!results[0].should_continue());
    }

    #[tokio::test]
    async fn chain_continues_without_stop_on_failure() {
        let ex = executor_with(vec![
            Hook::new("e", "exit 3"),
            Hook::new("e", "echo reached"),
        ]);
        let results = ex.execute_hooks(&HookEvent::new("e"), false).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].stdout.contains("reached"));
    }

    #[tokio::test]
    async fn timeout_kills_hook_and_reports() {
        let mut hook = Hook::new("e", "sleep 30");
        hook.timeout_secs = Some(0.2);
        let ex = executor_with(vec![hook]);
        let results = ex.execute_hooks(&HookEvent::new("e"), true).await;
        assert!(results[0].timed_out);
        assert!(!results[0].should_continue());
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn no_matching_hooks_returns_empty() {
        let ex = executor_with(vec![Hook::new("tool:Write:post", "echo x")]);
        let results = ex.execute_hooks(&HookEvent::new("tool:Bash:pre"), true).await;
        assert!(results.is_empty());
    }
}
