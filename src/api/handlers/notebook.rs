//! Code interpreter bridge endpoints.

use axum::extract::{Query, State};
use axum::response::sse::Sse;
use axum::Json;

use crate::api::dto::{CreateContextRequest, DeleteContextQuery, Envelope, RunCodeRequest};
use crate::api::sse::sse_from_receiver;
use crate::api::state::AppState;
use crate::error::{AppError, AppResult};
use crate::interpreter::{ContextSummary, ExecutionResult};

pub async fn create_context(
    State(state): State<AppState>,
    Json(body): Json<CreateContextRequest>,
) -> AppResult<Json<Envelope<ContextSummary>>> {
    let context = state.interpreter.create_context(body.language).await?;
    Ok(Json(Envelope::ok(context.summary())))
}

pub async fn list_contexts(State(state): State<AppState>) -> Json<Envelope<Vec<ContextSummary>>> {
    Json(Envelope::ok(state.interpreter.list_contexts()))
}

pub async fn delete_context(
    State(state): State<AppState>,
    Query(query): Query<DeleteContextQuery>,
) -> AppResult<Json<Envelope<()>>> {
    state.interpreter.delete_context(&query.session_id).await?;
    Ok(Json(Envelope::ok(())))
}

pub async fn run_code(
    State(state): State<AppState>,
    Json(body): Json<RunCodeRequest>,
) -> AppResult<Json<Envelope<ExecutionResult>>> {
    let context = state
        .interpreter
        .get(&body.session_id)
        .ok_or_else(|| AppError::CommandNotFound(body.session_id.clone()))?;
    let result = context.run_code(&body.code).await?;
    Ok(Json(Envelope::ok(result)))
}

pub async fn run_code_stream(
    State(state): State<AppState>,
    Json(body): Json<RunCodeRequest>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>> {
    let context = state
        .interpreter
        .get(&body.session_id)
        .ok_or_else(|| AppError::CommandNotFound(body.session_id.clone()))?;
    let rx = context.run_code_stream(body.code.clone()).await?;
    Ok(sse_from_receiver(rx))
}
