//! HTTP request surface: a thin adapter over the session engine, process
//! registry, port manager, file operations, and interpreter bridge.

pub mod dto;
pub mod handlers;
pub mod sse;
pub mod state;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ports::preview_proxy_middleware;
use crate::trace::trace_id_middleware;
use state::AppState;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

async fn health() -> (StatusCode, Json<HealthBody>) {
    (
        StatusCode::OK,
        Json(HealthBody {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PingBody {
    sandbox_status: &'static str,
}

async fn ping() -> Json<PingBody> {
    Json(PingBody { sandbox_status: "ready" })
}

/// Route names follow the canonical external interface table (§6). A few
/// routes beyond that non-exhaustive table are kept for functionality the
/// table doesn't itemize (listing contexts, killing a single background
/// `exec` command, a non-streaming notebook execute).
pub fn build_router(state: AppState) -> Router {
    use handlers::{exec, files, notebook, ports, process, session};

    let api = Router::new()
        .route("/health", get(health))
        .route("/api/ping", get(ping))
        .route("/api/session/create", post(session::create_session))
        .route("/api/session/:session_id", delete(session::destroy_session))
        .route("/api/execute", post(exec::exec))
        .route("/api/execute/stream", post(exec::exec_stream))
        .route("/api/execute/background", post(exec::start_background))
        .route("/api/execute/commands/:command_id/kill", post(exec::kill_command))
        .route("/api/process/start", post(process::start_process))
        .route("/api/process/list", get(process::list_processes))
        .route("/api/process/kill-all", delete(process::kill_all_processes))
        .route(
            "/api/process/:id",
            get(process::get_process).delete(process::kill_process),
        )
        .route("/api/process/:id/logs", get(process::process_logs))
        .route("/api/process/:id/stream", get(process::stream_process_logs))
        .route("/api/expose-port", post(ports::expose_port))
        .route("/api/unexpose-port", post(ports::unexpose_port))
        .route("/api/exposed-ports", get(ports::list_ports))
        .route("/api/write", post(files::write_file))
        .route("/api/read", post(files::read_file))
        .route("/api/read/stream", post(files::read_file_stream))
        .route("/api/delete", post(files::delete_file))
        .route("/api/rename", post(files::move_file))
        .route("/api/move", post(files::move_file))
        .route("/api/mkdir", post(files::mkdir))
        .route("/api/list-files", post(files::list_files))
        .route(
            "/api/notebook/session",
            post(notebook::create_context).delete(notebook::delete_context),
        )
        .route("/api/notebook/sessions", get(notebook::list_contexts))
        .route("/api/notebook/execute", post(notebook::run_code_stream))
        .route("/api/notebook/execute/sync", post(notebook::run_code))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
        .with_state(state.clone());

    // The preview proxy intercepts traffic by Host header ahead of the
    // router above, so it must be the outermost layer.
    api.layer(middleware::from_fn_with_state(state, preview_proxy_middleware))
}
