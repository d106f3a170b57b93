//! Foreground and background command execution against a session.

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::Json;

use crate::api::dto::{
    Envelope, ExecRequest, KillCommandRequest, KillResponse, StartBackgroundRequest, StartBackgroundResponse,
};
use crate::api::sse::sse_from_receiver;
use crate::api::state::AppState;
use crate::error::AppResult;
use crate::session::ExecResult;

pub async fn exec(
    State(state): State<AppState>,
    Json(body): Json<ExecRequest>,
) -> AppResult<Json<Envelope<ExecResult>>> {
    let session = state.sessions.get_or_create_default(body.session_id).await?;
    let result = session.exec(body.command, body.cwd, body.env).await?;
    Ok(Json(Envelope::ok(result)))
}

pub async fn exec_stream(
    State(state): State<AppState>,
    Json(body): Json<ExecRequest>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>> {
    let session = state.sessions.get_or_create_default(body.session_id).await?;
    let rx = session.exec_stream(body.command, body.cwd, body.env).await?;
    Ok(sse_from_receiver(rx))
}

pub async fn start_background(
    State(state): State<AppState>,
    Json(body): Json<StartBackgroundRequest>,
) -> AppResult<Json<Envelope<StartBackgroundResponse>>> {
    let session = state.sessions.get_or_create_default(body.session_id).await?;
    let (command_id, pid) = session.start_background(body.command, body.cwd, body.env).await?;
    Ok(Json(Envelope::ok(StartBackgroundResponse { command_id, pid })))
}

pub async fn kill_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Json(body): Json<KillCommandRequest>,
) -> AppResult<Json<Envelope<KillResponse>>> {
    let session = state.sessions.get_or_create_default(body.session_id).await?;
    let killed = session.kill_command(&command_id).await?;
    Ok(Json(Envelope::ok(KillResponse { killed })))
}
