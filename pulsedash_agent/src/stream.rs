//! Server-Sent Events endpoint. Each client gets a retry hint, the current
//! snapshot, then whatever the sampler broadcasts.

use crate::registry::{ConnectionHandle, ConnectionRegistry, StreamEvent};
use crate::state::AppState;
use axum::{
    extract::State,
    http::header::{HeaderName, CACHE_CONTROL},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use futures_util::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub async fn stream_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Read the frame before subscribing so a client never sees one snapshot
    // twice; at worst it waits for the next tick.
    let first = match state.current_frame().await {
        Ok(frame) => StreamEvent::Snapshot(frame),
        Err(e) => {
            warn!(error = %e, "failed to serialize initial snapshot");
            StreamEvent::Error(format!("failed to serialize snapshot: {e}").into())
        }
    };
    let (handle, rx) = state.registry.subscribe();
    let live = ClientStream {
        rx,
        _guard: ClientGuard {
            registry: state.registry.clone(),
            handle,
        },
    };

    let head = stream::iter([
        Ok(Event::default().retry(state.config.retry)),
        Ok(to_sse(first)),
    ]);

    (
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(head.chain(live)),
    )
}

fn to_sse(ev: StreamEvent) -> Event {
    match ev {
        StreamEvent::Snapshot(frame) => Event::default().data(&*frame),
        StreamEvent::Heartbeat(ms) => Event::default().comment(format!("hb {ms}")),
        StreamEvent::Error(msg) => Event::default()
            .event("error")
            .data(serde_json::json!({ "message": &*msg }).to_string()),
    }
}

/// Unsubscribes when the transport drops the stream.
struct ClientGuard {
    registry: ConnectionRegistry,
    handle: ConnectionHandle,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.handle);
    }
}

struct ClientStream {
    rx: mpsc::Receiver<StreamEvent>,
    _guard: ClientGuard,
}

impl Stream for ClientStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|ev| ev.map(|ev| Ok(to_sse(ev))))
    }
}
