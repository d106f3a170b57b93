//! Error taxonomy shared by every component, translated to HTTP responses
//! at the request surface. Mirrors the teacher's `ServerError` /
//! `IntoResponse` pattern, generalized to the full code list in the design.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidPath(String),
    #[error("{0}")]
    InvalidPort(String),
    #[error("{0}")]
    InvalidCommand(String),
    #[error("{0}")]
    ValidationFailed(String),

    #[error("session is not ready: {0}")]
    SessionNotReady(String),
    #[error("session destroyed: {0}")]
    SessionDestroyed(String),
    #[error("process not found: {0}")]
    ProcessNotFound(String),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("port {0} is not exposed")]
    PortNotExposed(u16),
    #[error("port {0} is already exposed")]
    PortAlreadyExposed(u16),

    #[error("output exceeded the configured cap: {0}")]
    OutputTooLarge(String),
    #[error("no space left: {0}")]
    NoSpace(String),
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file already exists: {0}")]
    FileExists(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotDirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timed out: {0}")]
    Timeout(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("io error: {0}")]
    IoError(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connection timed out: {0}")]
    ConnectionTimeout(String),
    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("path security violation: {0}")]
    PathSecurityViolation(String),
    #[error("dangerous command rejected: {0}")]
    DangerousCommand(String),
}

impl AppError {
    /// Stable string code used in the JSON error envelope and by clients
    /// to branch on error kind without parsing `message`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::InvalidPath(_) => "InvalidPath",
            AppError::InvalidPort(_) => "InvalidPort",
            AppError::InvalidCommand(_) => "InvalidCommand",
            AppError::ValidationFailed(_) => "ValidationFailed",
            AppError::SessionNotReady(_) => "SessionNotReady",
            AppError::SessionDestroyed(_) => "SessionDestroyed",
            AppError::ProcessNotFound(_) => "ProcessNotFound",
            AppError::CommandNotFound(_) => "CommandNotFound",
            AppError::PortNotExposed(_) => "PortNotExposed",
            AppError::PortAlreadyExposed(_) => "PortAlreadyExposed",
            AppError::OutputTooLarge(_) => "OutputTooLarge",
            AppError::NoSpace(_) => "NoSpace",
            AppError::ResourceBusy(_) => "ResourceBusy",
            AppError::ReadOnly(_) => "ReadOnly",
            AppError::FileNotFound(_) => "FileNotFound",
            AppError::FileExists(_) => "FileExists",
            AppError::IsDirectory(_) => "IsDirectory",
            AppError::NotDirectory(_) => "NotDirectory",
            AppError::PermissionDenied(_) => "PermissionDenied",
            AppError::Timeout(_) => "Timeout",
            AppError::CommandFailed(_) => "CommandFailed",
            AppError::IoError(_) => "IoError",
            AppError::ConnectionRefused(_) => "ConnectionRefused",
            AppError::ConnectionTimeout(_) => "ConnectionTimeout",
            AppError::UpstreamError(_) => "UpstreamError",
            AppError::PathSecurityViolation(_) => "PathSecurityViolation",
            AppError::DangerousCommand(_) => "DangerousCommand",
        }
    }

    fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            InvalidRequest(_) | InvalidPath(_) | InvalidPort(_) | InvalidCommand(_)
            | ValidationFailed(_) => StatusCode::BAD_REQUEST,
            SessionNotReady(_) | ProcessNotFound(_) | CommandNotFound(_) | PortNotExposed(_)
            | FileNotFound(_) => StatusCode::NOT_FOUND,
            SessionDestroyed(_) | PortAlreadyExposed(_) | FileExists(_) | ResourceBusy(_) => {
                StatusCode::CONFLICT
            }
            OutputTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            NoSpace(_) => StatusCode::INSUFFICIENT_STORAGE,
            ReadOnly(_) | PermissionDenied(_) | PathSecurityViolation(_) | DangerousCommand(_) => {
                StatusCode::FORBIDDEN
            }
            IsDirectory(_) | NotDirectory(_) => StatusCode::CONFLICT,
            Timeout(_) | ConnectionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CommandFailed(_) | IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ConnectionRefused(_) | UpstreamError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// A short actionable hint surfaced to the caller for a handful of
    /// common mistakes (per spec §7's "User-visible behaviour").
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            AppError::PortAlreadyExposed(_) => {
                Some("Unexpose the port first or choose a different port")
            }
            AppError::SessionNotReady(_) | AppError::SessionDestroyed(_) => {
                Some("Create a new session and retry")
            }
            AppError::PortNotExposed(_) => Some("Expose the port before routing preview traffic to it"),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let suggestion = self.suggestion();
        let message = self.to_string();

        tracing::warn!(code, %message, "request failed");

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code,
                message,
                suggestion,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
