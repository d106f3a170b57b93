//! Session engine: a persistent interactive shell per session, and the
//! command lifecycle built on top of it (§4.1 of the design).

pub mod command;
pub mod outputlog;
pub mod shell;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use command::{CommandHandle, CommandKind};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One event in an `execStream` sequence. A closed channel of variants
/// (§9 "Polymorphism") rather than an open trait hierarchy.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecEvent {
    Start { command_id: String },
    Stdout { chunk: String },
    Stderr { chunk: String },
    Complete { exit_code: i32 },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub command_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A session's child shell plus every command submitted through it.
pub struct Session {
    pub id: String,
    scratch_dir: PathBuf,
    shell: Arc<shell::ShellProcess>,
    commands: DashMap<String, CommandHandle>,
    config: SessionConfig,
    env_overlay: HashMap<String, String>,
}

impl Session {
    pub async fn create(
        id: String,
        config: SessionConfig,
        cwd: Option<PathBuf>,
        env_overlay: HashMap<String, String>,
    ) -> AppResult<Arc<Self>> {
        let scratch_dir = config.scratch_root.join(&id);
        std::fs::create_dir_all(&scratch_dir)
            .map_err(|e| AppError::IoError(format!("creating session scratch dir: {e}")))?;

        let initial_cwd = cwd.unwrap_or_else(|| config.default_cwd.clone());
        let shell = Arc::new(shell::ShellProcess::spawn(&initial_cwd, &env_overlay).await?);

        let watcher = shell.clone();
        tokio::spawn(async move {
            watcher.watch_exit().await;
        });

        Ok(Arc::new(Self {
            id,
            scratch_dir,
            shell,
            commands: DashMap::new(),
            config,
            env_overlay,
        }))
    }

    pub fn is_ready(&self) -> bool {
        self.shell.is_alive()
    }

    fn merged_env(&self, transient: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.env_overlay.clone();
        merged.extend(transient.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    async fn submit(
        &self,
        command: String,
        cwd: Option<String>,
        env: HashMap<String, String>,
        kind: CommandKind,
    ) -> AppResult<CommandHandle> {
        if !self.is_ready() {
            return Err(AppError::SessionNotReady(self.id.clone()));
        }

        let handle = CommandHandle::new(&self.scratch_dir, command.clone(), kind);
        shell::create_fifos(&handle)?;

        let body = shell::build_command_body(&command, cwd.as_deref(), &self.merged_env(&env));
        let script = match kind {
            CommandKind::Foreground => shell::foreground_script(&handle, &body),
            CommandKind::Background => shell::background_script(&handle, &body),
        };

        self.commands.insert(handle.command_id.clone(), handle.clone());
        self.shell.write_script(&script).await?;
        Ok(handle)
    }

    /// Foreground, synchronous execution (§4.1 `exec`).
    pub async fn exec(
        &self,
        command: String,
        cwd: Option<String>,
        env: HashMap<String, String>,
    ) -> AppResult<ExecResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let handle = self.submit(command, cwd, env, CommandKind::Foreground).await?;

        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let exit_code = match wait_for_exit_code(&handle.exit_code_file, timeout).await {
            Some(code) => code,
            None => {
                // Foreground commands can't be interrupted without taking the
                // shell down with them; the timeout destroys the session.
                self.destroy().await;
                self.commands.remove(&handle.command_id);
                return Err(AppError::Timeout(format!(
                    "command {} exceeded {}ms",
                    handle.command_id, self.config.command_timeout_ms
                )));
            }
        };

        let raw = read_capped(&handle.output_log, self.config.output_cap_bytes).await?;
        let split = outputlog::split(&raw);
        handle.cleanup();
        self.commands.remove(&handle.command_id);

        Ok(ExecResult {
            command_id: handle.command_id,
            stdout: String::from_utf8_lossy(&split.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&split.stderr).into_owned(),
            exit_code,
            success: exit_code == 0,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp,
        })
    }

    /// Streaming foreground execution (§4.1 `execStream`): tails the output
    /// log as it grows, ending with exactly one terminal event.
    pub async fn exec_stream(
        self: &Arc<Self>,
        command: String,
        cwd: Option<String>,
        env: HashMap<String, String>,
    ) -> AppResult<mpsc::Receiver<ExecEvent>> {
        let handle = self.submit(command, cwd, env, CommandKind::Foreground).await?;
        let (tx, rx) = mpsc::channel(256);
        let session = self.clone();
        let command_id = handle.command_id.clone();

        tokio::spawn(async move {
            let _ = tx.send(ExecEvent::Start {
                command_id: command_id.clone(),
            }).await;

            let timeout = Duration::from_millis(session.config.command_timeout_ms);
            let deadline = Instant::now() + timeout;
            let mut stdout_offset = 0usize;
            let mut stderr_offset = 0usize;

            loop {
                if let Ok(raw) = tokio::fs::read(&handle.output_log).await {
                    let split = outputlog::split(&raw);
                    if split.stdout.len() > stdout_offset {
                        let chunk = String::from_utf8_lossy(&split.stdout[stdout_offset..]).into_owned();
                        stdout_offset = split.stdout.len();
                        let _ = tx.send(ExecEvent::Stdout { chunk }).await;
                    }
                    if split.stderr.len() > stderr_offset {
                        let chunk = String::from_utf8_lossy(&split.stderr[stderr_offset..]).into_owned();
                        stderr_offset = split.stderr.len();
                        let _ = tx.send(ExecEvent::Stderr { chunk }).await;
                    }
                }

                if let Ok(contents) = tokio::fs::read_to_string(&handle.exit_code_file).await {
                    if let Some(code) = parse_exit_code(&contents) {
                        let _ = tx.send(ExecEvent::Complete { exit_code: code }).await;
                        break;
                    }
                }

                if Instant::now() >= deadline {
                    let _ = tx
                        .send(ExecEvent::Error {
                            message: "command timed out".to_string(),
                        })
                        .await;
                    session.destroy().await;
                    break;
                }
                sleep(POLL_INTERVAL).await;
            }

            handle.cleanup();
            session.commands.remove(&command_id);
        });

        Ok(rx)
    }

    /// Launch a background command and return once its pid is known
    /// (§4.1 `startBackground`).
    pub async fn start_background(
        &self,
        command: String,
        cwd: Option<String>,
        env: HashMap<String, String>,
    ) -> AppResult<(String, u32)> {
        let handle = self.submit(command, cwd, env, CommandKind::Background).await?;

        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let pid_str = match wait_for_line(&handle.pid_file, timeout).await {
            Some(line) => line,
            None => {
                self.commands.remove(&handle.command_id);
                return Err(AppError::Timeout(format!(
                    "background command {} never produced a pid",
                    handle.command_id
                )));
            }
        };
        let pid: u32 = pid_str
            .parse()
            .map_err(|_| AppError::IoError(format!("malformed pid file for {}", handle.command_id)))?;

        if let Some(mut entry) = self.commands.get_mut(&handle.command_id) {
            entry.pid = Some(pid);
        }

        Ok((handle.command_id, pid))
    }

    /// Read back accumulated output and exit status for a still-tracked
    /// command (used by the process registry's output tailer).
    pub async fn poll_command(&self, command_id: &str) -> AppResult<(outputlog::SplitOutput, Option<i32>)> {
        let handle = self
            .commands
            .get(command_id)
            .ok_or_else(|| AppError::CommandNotFound(command_id.to_string()))?
            .clone();

        let raw = read_capped(&handle.output_log, self.config.output_cap_bytes).await?;
        let split = outputlog::split(&raw);

        let exit_code = match tokio::fs::read_to_string(&handle.exit_code_file).await {
            Ok(contents) => parse_exit_code(&contents),
            Err(_) => None,
        };
        if exit_code.is_some() {
            handle.cleanup();
            self.commands.remove(command_id);
        }
        Ok((split, exit_code))
    }

    /// Send SIGTERM, then SIGKILL after a grace period, to a background
    /// command's pid (§4.1 `killCommand`).
    pub async fn kill_command(&self, command_id: &str) -> AppResult<bool> {
        let handle = match self.commands.get(command_id) {
            Some(entry) => entry.clone(),
            None => return Ok(false),
        };
        let Some(pid) = handle.pid else {
            return Ok(false);
        };
        if !process_alive(pid) {
            return Ok(false);
        }

        send_signal(pid, Signal::Term);
        sleep(Duration::from_millis(300)).await;
        if process_alive(pid) {
            send_signal(pid, Signal::Kill);
        }
        Ok(true)
    }

    /// Destroy the session: kill the shell and every scratch file.
    pub async fn destroy(&self) {
        self.shell.kill().await;
        for entry in self.commands.iter() {
            entry.cleanup();
        }
        self.commands.clear();
        let _ = std::fs::remove_dir_all(&self.scratch_dir);
    }
}

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    use nix::sys::signal::{self, Signal as NixSignal};
    use nix::unistd::Pid;
    let sig = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    let _ = signal::kill(Pid::from_raw(pid as i32), sig);
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;
    // Signal 0 performs no-op existence/permission checks only.
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

async fn wait_for_line(path: &std::path::Path, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(contents) = tokio::fs::read_to_string(path).await {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_exit_code(path: &std::path::Path, timeout: Duration) -> Option<i32> {
    wait_for_line(path, timeout).await.and_then(|line| parse_exit_code(&line))
}

fn parse_exit_code(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok()
}

async fn read_capped(path: &std::path::Path, cap: u64) -> AppResult<Vec<u8>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::IoError(format!("stat output log: {e}")))?;
    if metadata.len() > cap {
        return Err(AppError::OutputTooLarge(format!(
            "output log is {} bytes, cap is {cap}",
            metadata.len()
        )));
    }
    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::IoError(format!("reading output log: {e}")))
}

/// Owns every session in the container, creating the implicit "default"
/// session on first use.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    config: SessionConfig,
}

pub const DEFAULT_SESSION_ID: &str = "default";

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config,
        }
    }

    pub async fn create(
        &self,
        id: Option<String>,
        cwd: Option<PathBuf>,
        env: HashMap<String, String>,
    ) -> AppResult<Arc<Session>> {
        let id = id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        if let Some(existing) = self.sessions.get(&id) {
            if existing.is_ready() {
                return Ok(existing.clone());
            }
        }
        let session = Session::create(id.clone(), self.config.clone(), cwd, env).await?;
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Resolve a session id, creating the default session implicitly.
    pub async fn get_or_create_default(&self, id: Option<String>) -> AppResult<Arc<Session>> {
        let id = id.unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());
        if let Some(existing) = self.sessions.get(&id) {
            if existing.is_ready() {
                return Ok(existing.clone());
            }
        }
        self.create(Some(id), None, HashMap::new()).await
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub async fn destroy(&self, id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.destroy().await;
            true
        } else {
            false
        }
    }
}
