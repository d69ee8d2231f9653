//! Server-Sent Events (SSE) streaming of generation output.
//!
//! Protocol:
//! - Each token batch is sent as `data: {json}\n\n` ([`StreamChunk`])
//! - A final status event follows ([`StreamEnd`]), then `data: [DONE]\n\n`
//! - Text generated before the subscription is replayed as the first chunk,
//!   so a late subscriber still sees the full output.

use axum::response::sse::{Event, KeepAlive, Sse};
use booster_pod::{RequestSnapshot, Scheduler, TokenEvent};
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::{StreamChunk, StreamEnd};

/// Build the SSE response for one request's token stream.
pub fn stream_request(
    scheduler: Arc<Scheduler>,
    snap: RequestSnapshot,
    mut rx: broadcast::Receiver<TokenEvent>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = async_stream::stream! {
        let id = snap.id;

        // Replay whatever was generated before this subscriber attached.
        if !snap.text.is_empty() {
            let chunk = StreamChunk { id, text: snap.text.clone() };
            yield Ok(Event::default().data(serde_json::to_string(&chunk).unwrap()));
        }

        let mut phase = snap.phase;
        while !phase.is_terminal() {
            match rx.recv().await {
                Ok(TokenEvent::Token { text }) => {
                    let chunk = StreamChunk { id, text };
                    yield Ok(Event::default().data(serde_json::to_string(&chunk).unwrap()));
                }
                Ok(TokenEvent::Finished { phase: finished }) => {
                    phase = finished;
                }
                // A lagged subscriber loses stream chunks, never the final
                // status — the poll endpoint always has the full text.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(request = %id, skipped, "stream subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        // Final status event from a fresh snapshot, then the sentinel.
        if let Some(final_snap) = scheduler.snapshot(id) {
            let end = StreamEnd {
                id,
                status: final_snap.phase.as_str().to_string(),
                finish_reason: final_snap.finish_reason,
                error: final_snap.error,
            };
            yield Ok(Event::default().data(serde_json::to_string(&end).unwrap()));
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
