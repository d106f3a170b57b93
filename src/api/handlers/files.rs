//! File operation endpoints: binary-safe read/write via base64, plus an
//! SSE streaming route for large downloads.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::api::dto::{
    DeleteFileRequest, Envelope, ListFilesRequest, MkdirRequest, MoveFileRequest, ReadFileRequest, ReadFileResponse,
    WriteFileRequest,
};
use crate::api::sse::sse_from_receiver;
use crate::api::state::AppState;
use crate::error::{AppError, AppResult};
use crate::files::{self, FileEntry};

pub async fn write_file(
    State(state): State<AppState>,
    Json(body): Json<WriteFileRequest>,
) -> AppResult<Json<Envelope<()>>> {
    let bytes = BASE64
        .decode(&body.content_base64)
        .map_err(|e| AppError::InvalidRequest(format!("invalid base64 content: {e}")))?;
    files::write_file(std::path::Path::new(&body.path), &bytes, &state.config.files).await?;
    Ok(Json(Envelope::ok(())))
}

pub async fn read_file(
    State(state): State<AppState>,
    Json(body): Json<ReadFileRequest>,
) -> AppResult<Json<Envelope<ReadFileResponse>>> {
    let content = files::read_file(std::path::Path::new(&body.path), &state.config.files).await?;
    Ok(Json(Envelope::ok(ReadFileResponse {
        path: content.path,
        size: content.size,
        mime_type: content.mime_type,
        is_binary: content.is_binary,
        content_base64: BASE64.encode(&content.bytes),
    })))
}

pub async fn read_file_stream(
    State(state): State<AppState>,
    Json(body): Json<ReadFileRequest>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let rx = files::read_file_stream(std::path::Path::new(&body.path), &state.config.files).await?;
    Ok(sse_from_receiver(rx))
}

pub async fn mkdir(State(state): State<AppState>, Json(body): Json<MkdirRequest>) -> AppResult<Json<Envelope<()>>> {
    files::mkdir(std::path::Path::new(&body.path), body.recursive, &state.config.files).await?;
    Ok(Json(Envelope::ok(())))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Json(body): Json<DeleteFileRequest>,
) -> AppResult<Json<Envelope<()>>> {
    files::delete_file(std::path::Path::new(&body.path), &state.config.files).await?;
    Ok(Json(Envelope::ok(())))
}

/// Backs both `renameFile` and `moveFile` — the operation is identical at
/// the filesystem level.
pub async fn move_file(
    State(state): State<AppState>,
    Json(body): Json<MoveFileRequest>,
) -> AppResult<Json<Envelope<()>>> {
    files::move_file(
        std::path::Path::new(&body.from),
        std::path::Path::new(&body.to),
        &state.config.files,
    )
    .await?;
    Ok(Json(Envelope::ok(())))
}

pub async fn list_files(
    State(state): State<AppState>,
    Json(body): Json<ListFilesRequest>,
) -> AppResult<Json<Envelope<Vec<FileEntry>>>> {
    let entries = files::list_files(
        std::path::Path::new(&body.path),
        body.recursive,
        body.include_hidden,
        &state.config.files,
    )
    .await?;
    Ok(Json(Envelope::ok(entries)))
}
