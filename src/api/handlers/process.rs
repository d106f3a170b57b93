//! Background process registry endpoints.

use axum::extract::{Path, Query, State};
use axum::response::sse::Sse;
use axum::Json;

use crate::api::dto::{Envelope, KillAllResponse, KillResponse, LogsQuery, StartProcessRequest};
use crate::api::sse::sse_from_receiver;
use crate::api::state::AppState;
use crate::error::{AppError, AppResult};
use crate::process::{LogLine, ProcessSummary};

pub async fn start_process(
    State(state): State<AppState>,
    Json(body): Json<StartProcessRequest>,
) -> AppResult<Json<Envelope<ProcessSummary>>> {
    let record = state
        .processes
        .start_process(body.command, body.process_id, body.session_id, body.cwd, body.env)
        .await?;
    Ok(Json(Envelope::ok(record.summary())))
}

pub async fn list_processes(State(state): State<AppState>) -> Json<Envelope<Vec<ProcessSummary>>> {
    Json(Envelope::ok(state.processes.list()))
}

pub async fn get_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<ProcessSummary>>> {
    let record = state.processes.get(&id).ok_or(AppError::ProcessNotFound(id))?;
    Ok(Json(Envelope::ok(record.summary())))
}

pub async fn process_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<Envelope<Vec<LogLine>>>> {
    let logs = state.processes.logs(&id, query.tail).await?;
    Ok(Json(Envelope::ok(logs)))
}

pub async fn stream_process_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>> {
    let (backlog, mut live) = state.processes.stream_logs(&id).await?;
    let (tx, rx) = tokio::sync::mpsc::channel(256);
    tokio::spawn(async move {
        for line in backlog {
            if tx.send(line).await.is_err() {
                return;
            }
        }
        loop {
            match live.recv().await {
                Ok(line) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Ok(sse_from_receiver(rx))
}

pub async fn kill_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<KillResponse>>> {
    let killed = state.processes.kill(&id).await?;
    Ok(Json(Envelope::ok(KillResponse { killed })))
}

pub async fn kill_all_processes(State(state): State<AppState>) -> Json<Envelope<KillAllResponse>> {
    let killed = state.processes.kill_all().await;
    Json(Envelope::ok(KillAllResponse { killed }))
}
