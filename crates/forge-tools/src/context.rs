// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use forge_hooks::HookExecutor;
use forge_permissions::PermissionChecker;
use forge_undo::UndoStore;

/// Per-invocation execution context.
///
/// Side-channel references (undo store, permission checker, hook executor,
/// confirmation handler) are `Arc` handles so the components stay
/// independent crates linked only through this struct.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Absolute working directory; must exist and be a directory.
    pub working_dir: PathBuf,
    /// Optional outer wall-clock timeout for the tool body, in seconds.
    pub timeout_secs: Option<u64>,
    /// Dry-run short-circuits mutating tools to a synthetic success.
    pub dry_run: bool,
    /// Opaque session id.
    pub session_id: String,
    /// Undo store; mutating tools snapshot through it.
    pub undo: Option<Arc<Mutex<UndoStore>>>,
    /// Permission engine consulted before execution.
    pub permissions: Option<Arc<PermissionChecker>>,
    /// Hook executor for pre/post events.
    pub hooks: Option<Arc<HookExecutor>>,
    /// UI handler for ASK-level confirmations.
    pub confirm: Option<Arc<dyn ConfirmationHandler>>,
    /// When set, Write refuses canonical paths escaping this root.
    pub allowed_root: Option<PathBuf>,
}

impl ExecutionContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout_secs: None,
            dry_run: false,
            session_id: String::new(),
            undo: None,
            permissions: None,
            hooks: None,
            confirm: None,
            allowed_root: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    pub fn with_undo(mut self, undo: Arc<Mutex<UndoStore>>) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn with_permissions(mut self, checker: Arc<PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookExecutor>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn with_allowed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_root = Some(root.into());
        self
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("working_dir", &self.working_dir)
            .field("timeout_secs", &self.timeout_secs)
            .field("dry_run", &self.dry_run)
            .field("session_id", &self.session_id)
            .field("undo", &self.undo.is_some())
            .field("permissions", &self.permissions.is_some())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Handed to the UI when the permission engine answers ASK.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub description: String,
    /// Truncated argument preview for display.
    pub args_preview: String,
    /// The UI should answer within this window; expiry defaults to DENY.
    pub timeout: Duration,
}

/// UI-side confirmation seam.  `true` approves the tool call.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Handler that approves everything — for headless and test use.
pub struct ApproveAll;

#[async_trait]
impl ConfirmationHandler for ApproveAll {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
