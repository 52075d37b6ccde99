// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::McpError;

/// Byte-level transport under the MCP client.
///
/// Single-writer discipline: one request at a time writes bytes; responses
/// fan in through the client's shared receive task, which is the only
/// caller of `receive`.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn connect(&self) -> Result<(), McpError>;
    async fn send(&self, message: &Value) -> Result<(), McpError>;
    async fn receive(&self) -> Result<Value, McpError>;
    async fn disconnect(&self) -> Result<(), McpError>;
    fn is_connected(&self) -> bool;
}

// ─── stdio ────────────────────────────────────────────────────────────────────

/// Spawn a command and exchange newline-delimited JSON objects on its
/// stdin/stdout.  An undecodable line or EOF transitions the transport to
/// disconnected.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<String>,
    child: Mutex<Option<Child>>,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<FramedRead<ChildStdout, LinesCodec>>>,
    connected: AtomicBool,
}

impl StdioTransport {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            cwd,
            child: Mutex::new(None),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn connect(&self) -> Result<(), McpError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Transport(format!("spawn '{}': {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable".into()))?;

        *self.writer.lock().await = Some(stdin);
        *self.reader.lock().await = Some(FramedRead::new(stdout, LinesCodec::new()));
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        debug!(command = %self.command, "stdio transport connected");
        Ok(())
    }

    async fn send(&self, message: &Value) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }
        let mut line = message.to_string();
        line.push('\n');
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(McpError::Disconnected)?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("write: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("flush: {e}")))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Value, McpError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(McpError::Disconnected)?;
        match reader.next().await {
            Some(Ok(line)) => match serde_json::from_str(&line) {
                Ok(value) => Ok(value),
                Err(e) => {
                    // An undecodable frame poisons the stream: we can no
                    // longer trust message boundaries.
                    self.connected.store(false, Ordering::SeqCst);
                    Err(McpError::Protocol(format!("undecodable frame: {e}")))
                }
            },
            Some(Err(e)) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(McpError::Transport(format!("read: {e}")))
            }
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(McpError::Disconnected)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        debug!(command = %self.command, "stdio transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ─── HTTP ─────────────────────────────────────────────────────────────────────

/// POST each request to an endpoint; responses are queued for the receive
/// task.  "Connection" state is virtual.
pub struct HttpTransport {
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    inbound: Mutex<VecDeque<Value>>,
    notify: Notify,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            headers,
            client: reqwest::Client::new(),
            inbound: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&self) -> Result<(), McpError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &Value) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::Disconnected);
        }
        let mut req = self.client.post(&self.url).json(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST {}: {e}", self.url)))?;
        if !resp.status().is_success() {
            return Err(McpError::Transport(format!(
                "POST {} returned {}",
                self.url,
                resp.status()
            )));
        }
        // Notifications get empty bodies; only queue real response objects.
        let text = resp.text().await.unwrap_or_default();
        if !text.trim().is_empty() {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    self.inbound.lock().await.push_back(value);
                    self.notify.notify_one();
                }
                Err(e) => warn!("http transport: undecodable response body: {e}"),
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Value, McpError> {
        loop {
            if let Some(value) = self.inbound.lock().await.pop_front() {
                return Ok(value);
            }
            if !self.is_connected() {
                return Err(McpError::Disconnected);
            }
            self.notify.notified().await;
        }
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
