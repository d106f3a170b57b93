//! Request/response bodies for the HTTP surface. Kept separate from the
//! engine types so wire shape can evolve independently of internal structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_session_id() -> Option<String> {
    None
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default = "default_session_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartBackgroundRequest {
    pub command: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct StartBackgroundResponse {
    pub command_id: String,
    pub pid: u32,
}

#[derive(Debug, Deserialize)]
pub struct KillCommandRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KillResponse {
    pub killed: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartProcessRequest {
    pub command: String,
    /// Caller-assigned id; a fresh one is generated when omitted.
    #[serde(default)]
    pub process_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct KillAllResponse {
    pub killed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ExposePortRequest {
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnexposePortRequest {
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct PortResponse {
    pub port: u16,
    pub name: Option<String>,
    pub status: crate::ports::PortStatus,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    /// Base64-encoded so arbitrary binary content survives JSON transport.
    pub content_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ReadFileResponse {
    pub path: String,
    pub size: u64,
    pub mime_type: String,
    pub is_binary: bool,
    pub content_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFileRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveFileRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesRequest {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContextRequest {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteContextQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RunCodeRequest {
    pub session_id: String,
    pub code: String,
}
