//! Helpers for framing an `mpsc::Receiver` of serializable events as SSE
//! (`data: <json>\n\n` per the teacher's `stream()` handler).

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::mpsc;

/// Turn a receiver into an SSE response, JSON-encoding each item. Encoding
/// failures are logged and skipped rather than killing the stream.
pub fn sse_from_receiver<T>(mut rx: mpsc::Receiver<T>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let stream = async_stream::stream! {
        while let Some(item) = rx.recv().await {
            match serde_json::to_string(&item) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => tracing::warn!(error = %e, "failed to encode SSE event"),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
