//! Preview-URL reverse proxy: `<port>-<sandboxId>.<baseDomain>` requests are
//! forwarded to `127.0.0.1:<port>` before reaching the normal router,
//! including raw byte passthrough for WebSocket upgrades (§4.3).

use std::sync::OnceLock;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::api::state::AppState;

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?P<port>[0-9]+)-(?P<sandbox_id>[A-Za-z0-9-]+)\.(?P<base>.+)$").unwrap())
}

struct PreviewTarget {
    port: u16,
    sandbox_id: String,
}

fn parse_preview_host(host: &str) -> Option<PreviewTarget> {
    let host = host.split(':').next().unwrap_or(host);
    let captures = hostname_pattern().captures(host)?;
    let port: u16 = captures.name("port")?.as_str().parse().ok()?;
    Some(PreviewTarget {
        port,
        sandbox_id: captures.name("sandbox_id")?.as_str().to_string(),
    })
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let has_upgrade_token = headers
        .get(axum::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let is_websocket = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    has_upgrade_token && is_websocket
}

/// Runs before the normal router. Requests whose `Host` header doesn't
/// match the preview-URL pattern fall through to `next` unchanged.
pub async fn preview_proxy_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let host = match request.headers().get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => host.to_string(),
        None => return next.run(request).await,
    };

    let Some(target) = parse_preview_host(&host) else {
        return next.run(request).await;
    };

    if target.sandbox_id != state.config.sandbox_id {
        return (StatusCode::NOT_FOUND, "unknown sandbox").into_response();
    }
    if !state.ports.is_exposed(target.port) {
        return crate::error::AppError::PortNotExposed(target.port).into_response();
    }

    if is_websocket_upgrade(request.headers()) {
        proxy_websocket(request, target.port).await
    } else {
        proxy_http(request, target.port, &state).await
    }
}

async fn proxy_http(request: Request, port: u16, state: &AppState) -> Response {
    let (parts, body) = request.into_parts();
    let url = format!(
        "http://127.0.0.1:{port}{}",
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    );

    let mut upstream_request = state.http_client.request(parts.method.clone(), &url);
    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        upstream_request = upstream_request.header(name, value);
    }

    let stream = body.into_data_stream();
    upstream_request = upstream_request.body(reqwest::Body::wrap_stream(stream));

    let upstream_response = match upstream_request.send().await {
        Ok(response) => response,
        Err(e) => {
            return crate::error::AppError::ConnectionRefused(format!(
                "preview target 127.0.0.1:{port} unreachable: {e}"
            ))
            .into_response();
        }
    };

    let status = upstream_response.status();
    let mut builder = Response::builder().status(status.as_u16());
    for (name, value) in upstream_response.headers().iter() {
        if name == reqwest::header::TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }

    let response_stream = upstream_response.bytes_stream();
    builder
        .body(Body::from_stream(response_stream))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// WebSocket upgrades need raw byte splicing, not an HTTP client — connect
/// directly to the target, replay the handshake, then hand both sides to
/// `copy_bidirectional` once the upstream confirms the 101 response.
async fn proxy_websocket(request: Request, port: u16) -> Response {
    let (parts, _body) = request.into_parts();
    let mut upstream = match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(stream) => stream,
        Err(e) => {
            return crate::error::AppError::ConnectionRefused(format!(
                "preview target 127.0.0.1:{port} unreachable: {e}"
            ))
            .into_response();
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let mut handshake = format!("{} {} HTTP/1.1\r\n", parts.method, path);
    for (name, value) in parts.headers.iter() {
        if let Ok(v) = value.to_str() {
            handshake.push_str(&format!("{}: {}\r\n", name, v));
        }
    }
    handshake.push_str("\r\n");

    if upstream.write_all(handshake.as_bytes()).await.is_err() {
        return StatusCode::BAD_GATEWAY.into_response();
    }

    let (status, response_headers) = match read_handshake_response(&mut upstream).await {
        Some(parsed) => parsed,
        None => return StatusCode::BAD_GATEWAY.into_response(),
    };
    if status != 101 {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::BAD_GATEWAY)
            .into_response();
    }

    let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }

    let mut upgradeable = Request::from_parts(parts, Body::empty());
    let on_upgrade = hyper::upgrade::on(&mut upgradeable);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let mut client_io = TokioIo::new(upgraded);
                if let Err(e) = tokio::io::copy_bidirectional(&mut client_io, &mut upstream).await {
                    tracing::debug!(error = %e, "preview websocket splice ended");
                }
            }
            Err(e) => tracing::warn!(error = %e, "websocket upgrade failed"),
        }
    });

    builder
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

async fn read_handshake_response(stream: &mut TcpStream) -> Option<(u16, Vec<(String, String)>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > 64 * 1024 {
            return None;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let status_line = lines.next()?;
    let status: u16 = status_line.split_whitespace().nth(1)?.parse().ok()?;
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    Some((status, headers))
}
