//! Request trace-id propagation.
//!
//! `X-Trace-Id` is propagated if present on the inbound request, otherwise a
//! fresh id is generated; every log line emitted while handling the request
//! is nested under a `tracing` span carrying that id, and the response
//! echoes it back under the same header.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const CLIENT_ID_HEADER: &str = "x-sandbox-client-id";

/// Attach a trace id (incoming or freshly generated) to the request's
/// tracing span and echo it back on the response.
pub async fn trace_id_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let client_id = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        client_id = client_id.as_deref().unwrap_or("-"),
        method = %request.method(),
        path = %request.uri().path(),
    );
    let _entered = span.enter();

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }
    response
}
