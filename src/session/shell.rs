//! The persistent shell child process and the per-command script it is fed.
//!
//! One non-interactive `bash` is spawned per session with its own stdout and
//! stderr discarded — every command's output instead flows through a pair of
//! FIFOs that a pair of "labeler" loops drain into a single append-only log,
//! prefixed with a marker byte sequence that distinguishes the two streams.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{AppError, AppResult};
use crate::session::command::{CommandHandle, CommandKind};

/// Bytes prefixing a stdout line in the shared output log.
pub const STDOUT_MARKER: [u8; 3] = [0x01, 0x01, 0x01];
/// Bytes prefixing a stderr line in the shared output log.
pub const STDERR_MARKER: [u8; 3] = [0x02, 0x02, 0x02];

/// The session's child shell. Stdin is the only channel the engine writes
/// to directly; all command output is routed through FIFOs instead.
pub struct ShellProcess {
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    alive: Arc<AtomicBool>,
}

impl ShellProcess {
    pub async fn spawn(initial_cwd: &Path, env_overlay: &HashMap<String, String>) -> AppResult<Self> {
        let mut command = Command::new("bash");
        command
            .arg("--norc")
            .arg("--noprofile")
            .current_dir(initial_cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env_overlay {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AppError::IoError(format!("failed to spawn shell: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::IoError("shell stdin not piped".to_string()))?;

        Ok(Self {
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(stdin),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Write one complete script as a single buffer so concurrent callers
    /// cannot interleave partial scripts on the shell's stdin.
    pub async fn write_script(&self, script: &str) -> AppResult<()> {
        if !self.is_alive() {
            return Err(AppError::SessionDestroyed(
                "shell process is no longer running".to_string(),
            ));
        }
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| AppError::IoError(format!("failed writing to shell stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::IoError(format!("failed flushing shell stdin: {e}")))
    }

    /// Watch the shell subprocess; flips `alive` to false when it exits,
    /// whatever the cause. Returns immediately — spawn this in a task.
    pub async fn watch_exit(self: &Arc<Self>) {
        let mut child = self.child.lock().await;
        let _ = child.wait().await;
        self.alive.store(false, Ordering::SeqCst);
        tracing::warn!("session shell process exited");
    }

    pub async fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Quote a single shell word using POSIX single-quoting rules.
pub fn shell_quote(word: &str) -> String {
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for ch in word.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Build the command body: the transient env overlay applied via `env`
/// (process-scoped only, never persisted to the shell), optionally wrapped
/// in a subshell that `cd`s into a transient cwd (also non-persisting). A
/// bare `cd`/`export` inside `command` itself, with no transient cwd/env
/// given, still mutates the parent shell because nothing wraps it.
pub fn build_command_body(command: &str, cwd: Option<&str>, env: &HashMap<String, String>) -> String {
    let body = if env.is_empty() {
        command.to_string()
    } else {
        let mut prefix = String::from("env");
        for (key, value) in env {
            prefix.push(' ');
            prefix.push_str(&shell_quote(&format!("{key}={value}")));
        }
        format!("{prefix} {command}")
    };

    match cwd {
        Some(dir) => format!("(cd {} && {{ {} ; }})", shell_quote(dir), body),
        None => body,
    }
}

/// Build the script for a foreground command: runs inline (no `&`), so its
/// `cd`/`export`/function definitions persist in the shell that executes it.
pub fn foreground_script(handle: &CommandHandle, body: &str) -> String {
    let out = path_str(&handle.output_log);
    let exit = path_str(&handle.exit_code_file);
    let fifo_out = path_str(&handle.stdout_fifo);
    let fifo_err = path_str(&handle.stderr_fifo);

    format!(
        "{{\n\
         : > {out}\n\
         ( while IFS= read -r __sbx_line || [ -n \"$__sbx_line\" ]; do printf '\\x01\\x01\\x01%s\\n' \"$__sbx_line\" >> {out}; done < {fifo_out} ) &\n\
         __sbx_lbl_out=$!\n\
         ( while IFS= read -r __sbx_line || [ -n \"$__sbx_line\" ]; do printf '\\x02\\x02\\x02%s\\n' \"$__sbx_line\" >> {out}; done < {fifo_err} ) &\n\
         __sbx_lbl_err=$!\n\
         {{ {body} ; }} > {fifo_out} 2> {fifo_err}\n\
         __sbx_ec=$?\n\
         wait $__sbx_lbl_out $__sbx_lbl_err 2>/dev/null\n\
         echo $__sbx_ec > {exit}\n\
         }}\n"
    )
}

/// Build the script for a background command: runs with `&`, writes its pid
/// immediately, and hands off exit-code capture and cleanup to a detached
/// reaper so the shell itself returns right away.
pub fn background_script(handle: &CommandHandle, body: &str) -> String {
    let out = path_str(&handle.output_log);
    let exit = path_str(&handle.exit_code_file);
    let pid = path_str(&handle.pid_file);
    let fifo_out = path_str(&handle.stdout_fifo);
    let fifo_err = path_str(&handle.stderr_fifo);

    format!(
        "{{\n\
         : > {out}\n\
         ( while IFS= read -r __sbx_line || [ -n \"$__sbx_line\" ]; do printf '\\x01\\x01\\x01%s\\n' \"$__sbx_line\" >> {out}; done < {fifo_out} ) &\n\
         __sbx_lbl_out=$!\n\
         ( while IFS= read -r __sbx_line || [ -n \"$__sbx_line\" ]; do printf '\\x02\\x02\\x02%s\\n' \"$__sbx_line\" >> {out}; done < {fifo_err} ) &\n\
         __sbx_lbl_err=$!\n\
         {{ {body} ; }} > {fifo_out} 2> {fifo_err} &\n\
         __sbx_pid=$!\n\
         echo $__sbx_pid > {pid}\n\
         ( wait $__sbx_pid; __sbx_ec=$?; wait $__sbx_lbl_out $__sbx_lbl_err 2>/dev/null; echo $__sbx_ec > {exit} ) &\n\
         }}\n"
    )
}

fn path_str(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Create the two named pipes a command's output will flow through.
pub fn create_fifos(handle: &CommandHandle) -> AppResult<()> {
    #[cfg(unix)]
    {
        use nix::sys::stat::Mode;
        use nix::unistd::mkfifo;
        for path in [&handle.stdout_fifo, &handle.stderr_fifo] {
            mkfifo(path, Mode::from_bits_truncate(0o600))
                .map_err(|e| AppError::IoError(format!("mkfifo {}: {e}", path.display())))?;
        }
    }
    #[cfg(not(unix))]
    {
        return Err(AppError::IoError("FIFOs require a unix target".to_string()));
    }
    Ok(())
}

pub fn kind_tag(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Foreground => "foreground",
        CommandKind::Background => "background",
    }
}
