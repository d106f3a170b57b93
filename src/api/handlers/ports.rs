//! Port exposure endpoints backing the preview-URL proxy.

use axum::extract::State;
use axum::Json;

use crate::api::dto::{Envelope, ExposePortRequest, PortResponse, UnexposePortRequest};
use crate::api::state::AppState;
use crate::error::AppResult;
use crate::ports::{compose_preview_url, PortEntry};

fn to_response(entry: PortEntry, state: &AppState) -> PortResponse {
    let url = compose_preview_url(
        &state.config.preview_hostname_pattern,
        &state.config.base_domain,
        &state.config.sandbox_id,
        entry.port,
    );
    PortResponse {
        port: entry.port,
        name: entry.name,
        status: entry.status,
        url,
    }
}

pub async fn expose_port(
    State(state): State<AppState>,
    Json(body): Json<ExposePortRequest>,
) -> AppResult<Json<Envelope<PortResponse>>> {
    let entry = state.ports.expose(body.port, body.name)?;
    Ok(Json(Envelope::ok(to_response(entry, &state))))
}

pub async fn unexpose_port(
    State(state): State<AppState>,
    Json(body): Json<UnexposePortRequest>,
) -> AppResult<Json<Envelope<()>>> {
    state.ports.unexpose(body.port)?;
    Ok(Json(Envelope::ok(())))
}

pub async fn list_ports(State(state): State<AppState>) -> Json<Envelope<Vec<PortResponse>>> {
    let entries = state.ports.list().into_iter().map(|e| to_response(e, &state)).collect();
    Json(Envelope::ok(entries))
}
