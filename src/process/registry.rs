//! Background process registry: long-running commands tracked independently
//! of any particular caller's session, but each one still runs through its
//! originating session's shell so it inherits that session's cwd and env
//! overlay (§4.2). A ProcessRecord refers to its underlying command by the
//! (sessionId, commandId) pair rather than owning a child process directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use super::buffer::{LogLine, OutputBuffer, OutputStream};
use crate::config::ProcessConfig;
use crate::error::{AppError, AppResult};
use crate::session::SessionManager;

const OUTPUT_CAP_BYTES: usize = 5 * 1024 * 1024;
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Killed,
    Error,
}

/// One background process and everything the registry needs to describe,
/// tail, and kill it. Holds its originating session id and the command id
/// it was given by that session's shell, not a process handle of its own.
pub struct ProcessRecord {
    pub id: String,
    pub command: String,
    /// The transient cwd override passed to `startProcess`, if any. `None`
    /// means the command ran in whatever directory the session's shell was
    /// already in — the record doesn't snapshot that value independently.
    pub cwd: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Unset until the underlying session has actually accepted the
    /// command and handed back a command id and pid — the window during
    /// which a record is visible via `get`/`list` but still `Starting`.
    session_id: RwLock<Option<String>>,
    command_id: RwLock<Option<String>>,
    pid: RwLock<Option<u32>>,
    status: RwLock<ProcessStatus>,
    exit_code: RwLock<Option<i32>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    buffer: Arc<AsyncMutex<OutputBuffer>>,
    /// Unix timestamp (seconds) this record became terminal, for cleanup.
    terminal_since: AtomicI64,
}

impl ProcessRecord {
    pub fn status(&self) -> ProcessStatus {
        *self.status.read()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.read()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.read()
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.read()
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn command_id(&self) -> Option<String> {
        self.command_id.read().clone()
    }

    fn set_terminal(&self, status: ProcessStatus, exit_code: Option<i32>) {
        *self.status.write() = status;
        *self.exit_code.write() = exit_code;
        let now = Utc::now();
        *self.ended_at.write() = Some(now);
        self.terminal_since.store(now.timestamp(), Ordering::SeqCst);
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.status(),
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Killed | ProcessStatus::Error
        )
    }

    async fn snapshot_logs(&self, tail: Option<usize>) -> Vec<LogLine> {
        self.buffer.lock().await.snapshot(tail)
    }

    async fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.buffer.lock().await.subscribe()
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessSummary {
    pub id: String,
    pub command: String,
    pub cwd: Option<String>,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            id: self.id.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid(),
            status: self.status(),
            exit_code: self.exit_code(),
            started_at: self.started_at,
            ended_at: self.ended_at(),
        }
    }
}

#[derive(Clone)]
pub struct ProcessRegistry {
    processes: Arc<DashMap<String, Arc<ProcessRecord>>>,
    sessions: SessionManager,
    config: ProcessConfig,
}

impl ProcessRegistry {
    pub fn new(config: ProcessConfig, sessions: SessionManager) -> Self {
        Self {
            processes: Arc::new(DashMap::new()),
            sessions,
            config,
        }
    }

    /// Resolves or creates the named session, starts the command through
    /// its shell, and wires a tailer that mirrors the session's per-command
    /// output log and exit status into this record (§4.2 `startProcess`).
    ///
    /// `process_id` lets a caller pre-assign the id instead of receiving a
    /// generated one. The record is visible (in `Starting` status) as soon
    /// as the session lookup and background-command dispatch begin, not
    /// only once a pid comes back.
    pub async fn start_process(
        &self,
        command: String,
        process_id: Option<String>,
        session_id: Option<String>,
        cwd: Option<String>,
        env: HashMap<String, String>,
    ) -> AppResult<Arc<ProcessRecord>> {
        let id = process_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let record = Arc::new(ProcessRecord {
            id: id.clone(),
            command: command.clone(),
            cwd: cwd.clone(),
            started_at: Utc::now(),
            session_id: RwLock::new(None),
            command_id: RwLock::new(None),
            pid: RwLock::new(None),
            status: RwLock::new(ProcessStatus::Starting),
            exit_code: RwLock::new(None),
            ended_at: RwLock::new(None),
            buffer: Arc::new(AsyncMutex::new(OutputBuffer::new(OUTPUT_CAP_BYTES))),
            terminal_since: AtomicI64::new(0),
        });
        self.processes.insert(id.clone(), record.clone());

        let session = match self.sessions.get_or_create_default(session_id).await {
            Ok(session) => session,
            Err(e) => {
                self.processes.remove(&id);
                return Err(e);
            }
        };
        let (command_id, pid) = match session.start_background(command, cwd, env).await {
            Ok(pair) => pair,
            Err(e) => {
                self.processes.remove(&id);
                return Err(e);
            }
        };

        *record.session_id.write() = Some(session.id.clone());
        *record.command_id.write() = Some(command_id.clone());
        *record.pid.write() = Some(pid);
        *record.status.write() = ProcessStatus::Running;

        spawn_tailer(record.clone(), session, command_id);
        Ok(record)
    }

    pub fn list(&self) -> Vec<ProcessSummary> {
        self.processes.iter().map(|entry| entry.summary()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ProcessRecord>> {
        self.processes.get(id).map(|entry| entry.clone())
    }

    pub async fn logs(&self, id: &str, tail: Option<usize>) -> AppResult<Vec<LogLine>> {
        let record = self
            .get(id)
            .ok_or_else(|| AppError::ProcessNotFound(id.to_string()))?;
        Ok(record.snapshot_logs(tail).await)
    }

    /// Returns a backlog snapshot plus a live receiver for everything after
    /// it, so `streamLogs` callers never miss or duplicate a line.
    pub async fn stream_logs(&self, id: &str) -> AppResult<(Vec<LogLine>, broadcast::Receiver<LogLine>)> {
        let record = self
            .get(id)
            .ok_or_else(|| AppError::ProcessNotFound(id.to_string()))?;
        let buffer = record.buffer.lock().await;
        let backlog = buffer.snapshot(None);
        let receiver = buffer.subscribe();
        Ok((backlog, receiver))
    }

    /// Delegates to the owning session's `killCommand`; the tailer observes
    /// the resulting exit code and finalizes the record.
    pub async fn kill(&self, id: &str) -> AppResult<bool> {
        let record = self
            .get(id)
            .ok_or_else(|| AppError::ProcessNotFound(id.to_string()))?;
        if record.is_terminal() {
            return Ok(false);
        }
        // Still in `Starting` — no command id to kill yet.
        let Some(session_id) = record.session_id() else {
            return Ok(false);
        };
        let Some(command_id) = record.command_id() else {
            return Ok(false);
        };
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| AppError::SessionNotReady(session_id))?;

        let killed = session.kill_command(&command_id).await?;
        if killed {
            *record.status.write() = ProcessStatus::Killed;
        }
        Ok(killed)
    }

    pub async fn kill_all(&self) -> usize {
        let ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        let mut killed = 0;
        for id in ids {
            if matches!(self.kill(&id).await, Ok(true)) {
                killed += 1;
            }
        }
        killed
    }

    /// Drop terminal records older than `cleanup_after_secs`. Returns how
    /// many were removed.
    pub fn cleanup_completed(&self) -> usize {
        let cutoff = Utc::now().timestamp() - self.config.cleanup_after_secs as i64;
        let mut removed = 0;
        self.processes.retain(|_, record| {
            let terminal_since = record.terminal_since.load(Ordering::SeqCst);
            let expired = terminal_since != 0 && terminal_since < cutoff;
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

/// Poll the owning session for new output and a terminal exit code, mirror
/// both into the record's own buffer/status, and stop once the session
/// reports the command gone (either it finished, or the session itself was
/// destroyed out from under it).
fn spawn_tailer(record: Arc<ProcessRecord>, session: Arc<crate::session::Session>, command_id: String) {
    tokio::spawn(async move {
        let mut stdout_offset = 0usize;
        let mut stderr_offset = 0usize;
        loop {
            match session.poll_command(&command_id).await {
                Ok((split, exit_code)) => {
                    if split.stdout.len() > stdout_offset {
                        let chunk = String::from_utf8_lossy(&split.stdout[stdout_offset..]).into_owned();
                        stdout_offset = split.stdout.len();
                        record.buffer.lock().await.push(OutputStream::Stdout, chunk);
                    }
                    if split.stderr.len() > stderr_offset {
                        let chunk = String::from_utf8_lossy(&split.stderr[stderr_offset..]).into_owned();
                        stderr_offset = split.stderr.len();
                        record.buffer.lock().await.push(OutputStream::Stderr, chunk);
                    }
                    if let Some(code) = exit_code {
                        // kill() may already have flagged Killed; don't
                        // reclassify it as completed/failed once observed.
                        let final_status = if record.status() == ProcessStatus::Killed {
                            ProcessStatus::Killed
                        } else if code == 0 {
                            ProcessStatus::Completed
                        } else {
                            ProcessStatus::Failed
                        };
                        record.set_terminal(final_status, Some(code));
                        break;
                    }
                }
                Err(AppError::CommandNotFound(_)) => {
                    if !record.is_terminal() {
                        record.set_terminal(ProcessStatus::Error, None);
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(process_id = %record.id, error = %e, "process tail failed");
                    record.set_terminal(ProcessStatus::Error, None);
                    break;
                }
            }
            tokio::time::sleep(TAIL_POLL_INTERVAL).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn test_config() -> ProcessConfig {
        ProcessConfig {
            cleanup_after_secs: 3600,
        }
    }

    fn session_config(root: &std::path::Path) -> SessionConfig {
        SessionConfig {
            default_cwd: std::env::temp_dir(),
            command_timeout_ms: 5_000,
            output_cap_bytes: 1024 * 1024,
            scratch_root: root.to_path_buf(),
        }
    }

    fn registry(root: &std::path::Path) -> ProcessRegistry {
        let sessions = SessionManager::new(session_config(root));
        ProcessRegistry::new(test_config(), sessions)
    }

    #[tokio::test]
    async fn start_process_captures_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(tmp.path());
        let record = registry
            .start_process("echo from-process".to_string(), None, None, None, HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let logs = registry.logs(&record.id, None).await.unwrap();
        assert!(logs.iter().any(|l| l.data.contains("from-process")));
        assert_eq!(record.status(), ProcessStatus::Completed);
    }

    #[tokio::test]
    async fn start_process_honors_a_caller_supplied_process_id() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(tmp.path());
        let record = registry
            .start_process(
                "echo hi".to_string(),
                Some("my-process-id".to_string()),
                None,
                None,
                HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(record.id, "my-process-id");
        assert!(registry.get("my-process-id").is_some());
    }

    #[tokio::test]
    async fn kill_marks_process_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(tmp.path());
        let record = registry
            .start_process("sleep 30".to_string(), None, None, None, HashMap::new())
            .await
            .unwrap();

        let killed = registry.kill(&record.id).await.unwrap();
        assert!(killed);
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert_eq!(record.status(), ProcessStatus::Killed);
        assert!(record.exit_code().is_some());
    }

    #[tokio::test]
    async fn unknown_process_id_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(tmp.path());
        let result = registry.logs("missing", None).await;
        assert!(matches!(result, Err(AppError::ProcessNotFound(_))));
    }

    #[tokio::test]
    async fn background_process_inherits_session_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry(tmp.path());
        let sessions = registry.sessions.clone();
        let session = sessions.get_or_create_default(None).await.unwrap();

        let workdir = tmp.path().join("sub");
        let setup = format!("mkdir -p {} && cd {}", workdir.display(), workdir.display());
        session.exec(setup, None, HashMap::new()).await.unwrap();

        let record = registry
            .start_process("pwd".to_string(), None, None, None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let logs = registry.logs(&record.id, None).await.unwrap();
        let joined: String = logs.iter().map(|l| l.data.as_str()).collect();
        assert!(joined.trim().ends_with("/sub"));
    }
}
