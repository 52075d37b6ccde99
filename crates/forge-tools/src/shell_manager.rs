// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide registry of background shells.
//!
//! Shells are long-lived; their stdout/stderr are drained on demand by a
//! non-blocking read with a short per-call timeout that yields whatever is
//! currently buffered.  Output accumulates into a chunk deque with O(1)
//! append; when a stream exceeds its cap the oldest chunks are evicted and
//! the stream's `truncated` flag is set.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;
use uuid::Uuid;

/// Hard cap per stream (10 MiB) to bound memory.
const MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Per-read timeout: yield whatever arrived, never block the loop.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl ShellStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::Timeout => "timeout",
        }
    }
}

/// Append-only chunk buffer with eviction and a read offset.
#[derive(Debug, Default)]
struct StreamBuffer {
    chunks: VecDeque<String>,
    size: usize,
    truncated: bool,
    /// Byte offset into the *retained* content already handed out by
    /// `new_output`.
    read_offset: usize,
}

impl StreamBuffer {
    fn append(&mut self, data: String) {
        self.size += data.len();
        self.chunks.push_back(data);
        while self.size > MAX_BUFFER_SIZE {
            let Some(removed) = self.chunks.pop_front() else { break };
            self.size -= removed.len();
            // The evicted prefix may include bytes not yet read; keep the
            // offset pointing at the same logical position in what remains.
            self.read_offset = self.read_offset.saturating_sub(removed.len());
            self.truncated = true;
        }
    }

    fn full(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    /// The suffix since the last read; advances the read offset.
    fn new_output(&mut self) -> String {
        let full = self.full();
        let start = self.read_offset.min(full.len());
        // Offsets always land on chunk boundaries, which are char boundaries.
        let out = full[start..].to_string();
        self.read_offset = full.len();
        out
    }
}

/// A background shell process.
pub struct ShellProcess {
    pub id: String,
    pub command: String,
    pub working_dir: String,
    pub status: ShellStatus,
    pub exit_code: Option<i32>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: StreamBuffer,
    stderr_buf: StreamBuffer,
}

impl ShellProcess {
    pub fn stdout_truncated(&self) -> bool {
        self.stdout_buf.truncated
    }

    pub fn stderr_truncated(&self) -> bool {
        self.stderr_buf.truncated
    }

    pub fn is_running(&mut self) -> bool {
        let exit_code = match &mut self.child {
            None => return false,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => status.code(),
                Ok(None) => return true,
                Err(_) => return false,
            },
        };
        self.record_exit(exit_code);
        false
    }

    fn record_exit(&mut self, code: Option<i32>) {
        if self.completed_at.is_none() {
            self.exit_code = code;
            self.completed_at = Some(Instant::now());
            if !matches!(self.status, ShellStatus::Killed | ShellStatus::Timeout) {
                self.status = if code == Some(0) {
                    ShellStatus::Completed
                } else {
                    ShellStatus::Failed
                };
            }
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Instant::now);
        Some(end.duration_since(started).as_secs_f64() * 1000.0)
    }

    /// Drain whatever is currently buffered from the pipes.
    ///
    /// Each stream is read in short timed slices, breaking on EOF or read
    /// error.  Returns true when any data was read.
    pub async fn read_output(&mut self) -> bool {
        let mut read_any = false;

        if let Some(mut stdout) = self.stdout.take() {
            let (eof, got) = drain_stream(&mut stdout, &mut self.stdout_buf).await;
            read_any |= got;
            if !eof {
                self.stdout = Some(stdout);
            }
        }
        if let Some(mut stderr) = self.stderr.take() {
            let (eof, got) = drain_stream(&mut stderr, &mut self.stderr_buf).await;
            read_any |= got;
            if !eof {
                self.stderr = Some(stderr);
            }
        }

        // Refresh exit status opportunistically so status flips without an
        // explicit wait().
        let _ = self.is_running();
        read_any
    }

    /// Output accumulated since the last `new_output` call.
    pub fn new_output(&mut self, include_stderr: bool) -> String {
        let mut out = self.stdout_buf.new_output();
        if include_stderr {
            let err = self.stderr_buf.new_output();
            if !err.is_empty() {
                out.push_str("\n[stderr]\n");
                out.push_str(&err);
            }
        }
        out
    }

    /// Everything currently retained.
    pub fn all_output(&self) -> String {
        let mut out = self.stdout_buf.full();
        let err = self.stderr_buf.full();
        if !err.is_empty() {
            out.push_str("\n[stderr]\n");
            out.push_str(&err);
        }
        out
    }

    /// Wait for the process to exit within `timeout`.  On expiry the status
    /// becomes `Timeout` and an error is returned; the process keeps running
    /// until killed.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<i32, &'static str> {
        let status = {
            let Some(child) = &mut self.child else {
                return Err("process not started");
            };
            match timeout {
                Some(t) => tokio::time::timeout(t, child.wait()).await,
                None => Ok(child.wait().await),
            }
        };
        match status {
            Ok(Ok(s)) => {
                self.record_exit(s.code());
                Ok(s.code().unwrap_or(-1))
            }
            Ok(Err(_)) => Err("wait failed"),
            Err(_) => {
                self.status = ShellStatus::Timeout;
                Err("timeout")
            }
        }
    }

    /// SIGKILL-equivalent; records `completed_at`.
    pub fn kill(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
        self.status = ShellStatus::Killed;
        self.completed_at = Some(Instant::now());
    }

    /// Polite termination (SIGTERM on unix).  The status is not changed
    /// until the process actually exits.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(child) = &self.child {
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        self.kill();
    }
}

/// Read timed slices from one pipe into its buffer.
/// Returns `(eof, read_any)`.
async fn drain_stream<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    buf: &mut StreamBuffer,
) -> (bool, bool) {
    let mut read_any = false;
    let mut bytes = [0u8; READ_CHUNK];
    loop {
        match tokio::time::timeout(READ_TIMEOUT, reader.read(&mut bytes)).await {
            Ok(Ok(0)) => return (true, read_any),
            Ok(Ok(n)) => {
                buf.append(String::from_utf8_lossy(&bytes[..n]).into_owned());
                read_any = true;
            }
            Ok(Err(_)) => return (true, read_any),
            Err(_) => return (false, read_any),
        }
    }
}

/// Process-wide registry of background shells keyed by `shell_<hex8>` ids.
pub struct ShellManager {
    shells: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ShellProcess>>>>,
}

impl ShellManager {
    pub fn new() -> Self {
        Self { shells: Mutex::new(HashMap::new()) }
    }

    /// The process singleton.  Lives from startup to shutdown; tests use
    /// `reset()` to clear it.
    pub fn global() -> &'static ShellManager {
        static INSTANCE: OnceLock<ShellManager> = OnceLock::new();
        INSTANCE.get_or_init(ShellManager::new)
    }

    /// Spawn a subshell with piped output and register it.
    pub fn create(
        &self,
        command: &str,
        working_dir: &str,
        env: Option<&[(String, String)]>,
    ) -> std::io::Result<Arc<tokio::sync::Mutex<ShellProcess>>> {
        let id = format!("shell_{}", &Uuid::new_v4().simple().to_string()[..8]);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.current_dir(working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(vars) = env {
            for (k, v) in vars {
                cmd.env(k, v);
            }
        }

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let shell = ShellProcess {
            id: id.clone(),
            command: command.to_string(),
            working_dir: working_dir.to_string(),
            status: ShellStatus::Running,
            exit_code: None,
            created_at: Instant::now(),
            started_at: Some(Instant::now()),
            completed_at: None,
            child: Some(child),
            stdout,
            stderr,
            stdout_buf: StreamBuffer::default(),
            stderr_buf: StreamBuffer::default(),
        };

        debug!(id = %id, cmd = %command, "started background shell");
        let handle = Arc::new(tokio::sync::Mutex::new(shell));
        self.shells
            .lock()
            .expect("shell registry poisoned")
            .insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<tokio::sync::Mutex<ShellProcess>>> {
        self.shells.lock().expect("shell registry poisoned").get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<tokio::sync::Mutex<ShellProcess>>> {
        self.shells
            .lock()
            .expect("shell registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub async fn list_running(&self) -> Vec<String> {
        let mut running = Vec::new();
        for handle in self.list() {
            let mut shell = handle.lock().await;
            if shell.is_running() {
                running.push(shell.id.clone());
            }
        }
        running
    }

    /// Remove completed shells older than `max_age`.  Returns the count.
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let mut to_remove = Vec::new();
        for handle in self.list() {
            let mut shell = handle.lock().await;
            let old_enough =
                matches!(shell.completed_at, Some(done) if done.elapsed() > max_age);
            if !shell.is_running() && old_enough {
                to_remove.push(shell.id.clone());
            }
        }
        let mut shells = self.shells.lock().expect("shell registry poisoned");
        for id in &to_remove {
            shells.remove(id);
        }
        to_remove.len()
    }

    /// Kill all running shells.  Returns the count killed.
    pub async fn kill_all(&self) -> usize {
        let mut count = 0;
        for handle in self.list() {
            let mut shell = handle.lock().await;
            if shell.is_running() {
                shell.kill();
                count += 1;
            }
        }
        count
    }

    /// Test-only: kill every shell and clear the registry.
    pub async fn reset(&self) {
        self.kill_all().await;
        self.shells.lock().expect("shell registry poisoned").clear();
    }
}

impl Default for ShellManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_shell_id_and_runs() {
        let mgr = ShellManager::new();
        let handle = mgr.create("echo hi", "/tmp", None).unwrap();
        let shell = handle.lock().await;
        assert!(shell.id.starts_with("shell_"));
        assert_eq!(shell.status, ShellStatus::Running);
    }

    #[tokio::test]
    async fn output_is_captured_and_read_incrementally() {
        let mgr = ShellManager::new();
        let handle = mgr.create("echo one; echo two", "/tmp", None).unwrap();
        let mut shell = handle.lock().await;
        shell.wait(Some(Duration::from_secs(5))).await.unwrap();
        shell.read_output().await;

        let first = shell.new_output(true);
        assert!(first.contains("one"));
        assert!(first.contains("two"));

        // Nothing new since the last read.
        assert!(shell.new_output(true).is_empty());
    }

    #[tokio::test]
    async fn stderr_is_tagged_in_output() {
        let mgr = ShellManager::new();
        let handle = mgr.create("echo err >&2", "/tmp", None).unwrap();
        let mut shell = handle.lock().await;
        shell.wait(Some(Duration::from_secs(5))).await.unwrap();
        shell.read_output().await;
        let out = shell.new_output(true);
        assert!(out.contains("[stderr]"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn exit_zero_is_completed_nonzero_is_failed() {
        let mgr = ShellManager::new();

        let ok = mgr.create("true", "/tmp", None).unwrap();
        ok.lock().await.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(ok.lock().await.status, ShellStatus::Completed);

        let bad = mgr.create("exit 3", "/tmp", None).unwrap();
        bad.lock().await.wait(Some(Duration::from_secs(5))).await.unwrap();
        let bad = bad.lock().await;
        assert_eq!(bad.status, ShellStatus::Failed);
        assert_eq!(bad.exit_code, Some(3));
    }

    #[tokio::test]
    async fn kill_marks_killed_and_records_completion() {
        let mgr = ShellManager::new();
        let handle = mgr.create("sleep 60", "/tmp", None).unwrap();
        {
            let mut shell = handle.lock().await;
            shell.kill();
            assert_eq!(shell.status, ShellStatus::Killed);
            assert!(shell.completed_at.is_some());
        }
        // Process actually dies.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.lock().await.is_running());
    }

    #[tokio::test]
    async fn kill_all_only_counts_running() {
        let mgr = ShellManager::new();
        let done = mgr.create("true", "/tmp", None).unwrap();
        done.lock().await.wait(Some(Duration::from_secs(5))).await.unwrap();
        let _running = mgr.create("sleep 60", "/tmp", None).unwrap();

        assert_eq!(mgr.kill_all().await, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_old_completed_shells() {
        let mgr = ShellManager::new();
        let handle = mgr.create("true", "/tmp", None).unwrap();
        handle.lock().await.wait(Some(Duration::from_secs(5))).await.unwrap();

        // Zero max-age: anything completed is old.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = mgr.cleanup_completed(Duration::from_millis(1)).await;
        assert_eq!(removed, 1);
        assert!(mgr.list().is_empty());
    }

    #[tokio::test]
    async fn env_vars_reach_the_shell() {
        let mgr = ShellManager::new();
        let env = vec![("FORGE_SHELL_TEST".to_string(), "marker-42".to_string())];
        let handle = mgr.create("echo $FORGE_SHELL_TEST", "/tmp", Some(&env)).unwrap();
        let mut shell = handle.lock().await;
        shell.wait(Some(Duration::from_secs(5))).await.unwrap();
        shell.read_output().await;
        assert!(shell.all_output().contains("marker-42"));
    }

    #[test]
    fn buffer_evicts_oldest_chunks_and_sets_truncated() {
        let mut buf = StreamBuffer::default();
        // Three chunks of 4 MiB each: the first must be evicted.
        for c in ["a", "b", "c"] {
            buf.append(c.repeat(4 * 1024 * 1024));
        }
        assert!(buf.truncated);
        assert!(buf.size <= MAX_BUFFER_SIZE);
        let full = buf.full();
        assert!(!full.contains('a'));
        assert!(full.ends_with('c'));
    }

    #[test]
    fn buffer_read_offset_survives_eviction() {
        let mut buf = StreamBuffer::default();
        buf.append("early".into());
        let _ = buf.new_output();
        buf.append("x".repeat(MAX_BUFFER_SIZE));
        // "early" was evicted; the next read returns only retained data
        // without panicking on a stale offset.
        let out = buf.new_output();
        assert!(out.ends_with('x'));
    }

    #[tokio::test]
    async fn reset_clears_registry() {
        let mgr = ShellManager::new();
        mgr.create("sleep 60", "/tmp", None).unwrap();
        mgr.reset().await;
        assert!(mgr.list().is_empty());
    }
}
