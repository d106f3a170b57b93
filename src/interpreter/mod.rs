//! Code interpreter bridge (§4.5): each [`CodeContext`] owns one kernel
//! child process and speaks a newline-delimited JSON protocol to it. The
//! kernel itself (the thing that actually evaluates code) is out of scope
//! here — this module only manages the bridge's side of the wire.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::config::InterpreterConfig;
use crate::error::{AppError, AppResult};

/// One line sent to the kernel's stdin.
#[derive(Serialize)]
struct KernelRequest<'a> {
    op: &'static str,
    code: &'a str,
}

/// One line read back from the kernel's stdout. `status: idle` marks the
/// end of a single `run_code` turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelMessage {
    Stream { name: String, text: String },
    ExecuteResult { data: HashMap<String, serde_json::Value> },
    DisplayData { data: HashMap<String, serde_json::Value> },
    Error { ename: String, evalue: String },
    Status { state: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub id: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// One rich-output item from a kernel's mime bundle, demuxed into named
/// fields instead of a raw `{mime: value}` map (§4.5).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ResultItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<serde_json::Value>,
}

impl ResultItem {
    fn from_mime_bundle(data: &HashMap<String, serde_json::Value>) -> Self {
        let as_text = |v: &serde_json::Value| v.as_str().map(|s| s.to_string());
        Self {
            text: data.get("text/plain").and_then(as_text),
            html: data.get("text/html").and_then(as_text),
            markdown: data.get("text/markdown").and_then(as_text),
            latex: data.get("text/latex").and_then(as_text),
            json: data.get("application/json").cloned(),
            png: data.get("image/png").and_then(as_text),
            jpeg: data.get("image/jpeg").and_then(as_text),
            svg: data.get("image/svg+xml").and_then(as_text),
            chart: data.get("application/vnd.sandboxd.chart+json").cloned(),
        }
    }
}

/// The full outcome of one `runCode` turn (§4.5).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ExecutionResult {
    pub results: Vec<ResultItem>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn demux(messages: Vec<KernelMessage>) -> ExecutionResult {
    let mut out = ExecutionResult::default();
    for message in messages {
        match message {
            KernelMessage::Stream { name, text } => {
                if name == "stderr" {
                    out.stderr.push(text);
                } else {
                    out.stdout.push(text);
                }
            }
            KernelMessage::ExecuteResult { data } | KernelMessage::DisplayData { data } => {
                out.results.push(ResultItem::from_mime_bundle(&data));
            }
            KernelMessage::Error { ename, evalue } => {
                out.error = Some(format!("{ename}: {evalue}"));
            }
            KernelMessage::Status { .. } => {}
        }
    }
    out
}

/// One increment of a streamed `runCodeStream` turn (§4.5).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionEvent {
    Stdout { chunk: String },
    Stderr { chunk: String },
    Result { result: ResultItem },
    Error { message: String },
    Complete,
}

fn to_event(message: KernelMessage) -> Option<ExecutionEvent> {
    match message {
        KernelMessage::Stream { name, text } => Some(if name == "stderr" {
            ExecutionEvent::Stderr { chunk: text }
        } else {
            ExecutionEvent::Stdout { chunk: text }
        }),
        KernelMessage::ExecuteResult { data } | KernelMessage::DisplayData { data } => Some(ExecutionEvent::Result {
            result: ResultItem::from_mime_bundle(&data),
        }),
        KernelMessage::Error { ename, evalue } => Some(ExecutionEvent::Error {
            message: format!("{ename}: {evalue}"),
        }),
        KernelMessage::Status { .. } => None,
    }
}

pub struct CodeContext {
    pub id: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    /// Broadcast-free fan-out: each `run_code_stream` call owns the reader
    /// task's output exclusively, so contexts serialize one execution at a
    /// time — matching a real kernel's single-threaded execution model.
    reader: Arc<AsyncMutex<BufReader<tokio::process::ChildStdout>>>,
}

impl CodeContext {
    async fn spawn(id: String, language: String, kernel_command: &str) -> AppResult<Self> {
        let mut parts = kernel_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AppError::IoError("empty kernel_command".to_string()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(parts)
            .env("SANDBOXD_KERNEL_LANGUAGE", &language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| AppError::IoError(format!("failed to spawn kernel: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::IoError("kernel stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::IoError("kernel stdout not piped".to_string()))?;

        Ok(Self {
            id,
            language,
            created_at: Utc::now(),
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(stdin),
            reader: Arc::new(AsyncMutex::new(BufReader::new(stdout))),
        })
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            id: self.id.clone(),
            language: self.language.clone(),
            created_at: self.created_at,
        }
    }

    async fn send(&self, code: &str) -> AppResult<()> {
        let request = KernelRequest { op: "execute", code };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| AppError::IoError(format!("encoding kernel request: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::IoError(format!("writing to kernel: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| AppError::IoError(format!("flushing kernel stdin: {e}")))
    }

    /// Run code to completion, collecting every message up to the
    /// terminating `status: idle` and demuxing it into a typed result.
    pub async fn run_code(&self, code: &str) -> AppResult<ExecutionResult> {
        self.send(code).await?;
        let mut messages = Vec::new();
        let mut reader = self.reader.lock().await;
        loop {
            let message = read_one(&mut reader).await?;
            let is_idle = matches!(&message, KernelMessage::Status { state } if state == "idle");
            messages.push(message);
            if is_idle {
                break;
            }
        }
        Ok(demux(messages))
    }

    /// Run code, forwarding each demuxed event to the channel as it arrives
    /// instead of buffering the whole turn.
    pub async fn run_code_stream(self: &Arc<Self>, code: String) -> AppResult<mpsc::Receiver<ExecutionEvent>> {
        self.send(&code).await?;
        let (tx, rx) = mpsc::channel(256);
        let context = self.clone();
        tokio::spawn(async move {
            let mut reader = context.reader.lock().await;
            loop {
                let message = match read_one(&mut reader).await {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "kernel stream read failed");
                        let _ = tx.send(ExecutionEvent::Error { message: e.to_string() }).await;
                        break;
                    }
                };
                let is_idle = matches!(&message, KernelMessage::Status { state } if state == "idle");
                if let Some(event) = to_event(message) {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                if is_idle {
                    let _ = tx.send(ExecutionEvent::Complete).await;
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn kill(&self) {
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

async fn read_one(
    reader: &mut BufReader<tokio::process::ChildStdout>,
) -> AppResult<KernelMessage> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| AppError::IoError(format!("reading from kernel: {e}")))?;
    if n == 0 {
        return Err(AppError::IoError("kernel closed its stdout".to_string()));
    }
    serde_json::from_str(line.trim()).map_err(|e| AppError::IoError(format!("malformed kernel message: {e}")))
}

#[derive(Clone)]
pub struct InterpreterBridge {
    contexts: Arc<DashMap<String, Arc<CodeContext>>>,
    config: InterpreterConfig,
}

impl InterpreterBridge {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            contexts: Arc::new(DashMap::new()),
            config,
        }
    }

    pub async fn create_context(&self, language: String) -> AppResult<Arc<CodeContext>> {
        let kernel_command = self.config.kernel_command.as_deref().ok_or_else(|| {
            AppError::InvalidRequest("no interpreter.kernel_command configured".to_string())
        })?;
        let id = uuid::Uuid::new_v4().to_string();
        let context = Arc::new(CodeContext::spawn(id.clone(), language, kernel_command).await?);
        self.contexts.insert(id, context.clone());
        Ok(context)
    }

    pub fn get(&self, id: &str) -> Option<Arc<CodeContext>> {
        self.contexts.get(id).map(|e| e.clone())
    }

    pub fn list_contexts(&self) -> Vec<ContextSummary> {
        self.contexts.iter().map(|e| e.summary()).collect()
    }

    pub async fn delete_context(&self, id: &str) -> AppResult<()> {
        let (_, context) = self
            .contexts
            .remove(id)
            .ok_or_else(|| AppError::CommandNotFound(id.to_string()))?;
        context.kill().await;
        Ok(())
    }
}
