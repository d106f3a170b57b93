//! Per-command scratch-file bookkeeping owned by the session engine.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Foreground,
    Background,
}

/// File paths and identity for one command submitted through a session's
/// shell. Terminal once its exit-code file has been observed and read.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    pub command_id: String,
    pub command: String,
    pub kind: CommandKind,
    pub pid: Option<u32>,
    pub output_log: PathBuf,
    pub exit_code_file: PathBuf,
    pub pid_file: PathBuf,
    pub stdout_fifo: PathBuf,
    pub stderr_fifo: PathBuf,
}

impl CommandHandle {
    pub fn new(scratch_dir: &Path, command: String, kind: CommandKind) -> Self {
        let command_id = uuid::Uuid::new_v4().to_string();
        Self {
            output_log: scratch_dir.join(format!("{command_id}.out")),
            exit_code_file: scratch_dir.join(format!("{command_id}.exit")),
            pid_file: scratch_dir.join(format!("{command_id}.pid")),
            stdout_fifo: scratch_dir.join(format!("{command_id}.stdout.fifo")),
            stderr_fifo: scratch_dir.join(format!("{command_id}.stderr.fifo")),
            command_id,
            command,
            kind,
            pid: None,
        }
    }

    pub fn cleanup(&self) {
        for path in [
            &self.output_log,
            &self.exit_code_file,
            &self.pid_file,
            &self.stdout_fifo,
            &self.stderr_fifo,
        ] {
            let _ = std::fs::remove_file(path);
        }
    }
}
