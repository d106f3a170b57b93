//! Session lifecycle endpoints: create and destroy.

use axum::extract::{Path, State};
use axum::Json;

use crate::api::dto::{CreateSessionRequest, Envelope, KillResponse};
use crate::api::state::AppState;
use crate::error::AppResult;

#[derive(serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub ready: bool,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> AppResult<Json<Envelope<SessionSummary>>> {
    let cwd = body.cwd.map(std::path::PathBuf::from);
    let session = state.sessions.create(body.session_id, cwd, body.env).await?;
    Ok(Json(Envelope::ok(SessionSummary {
        session_id: session.id.clone(),
        ready: session.is_ready(),
    })))
}

pub async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Envelope<KillResponse>>> {
    let destroyed = state.sessions.destroy(&session_id).await;
    Ok(Json(Envelope::ok(KillResponse { killed: destroyed })))
}
