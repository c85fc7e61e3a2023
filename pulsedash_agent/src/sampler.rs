//! Background sampler: one periodic loop that aggregates a snapshot, caches
//! its JSON and offers it to every stream client, plus an independent
//! heartbeat.

use crate::registry::{Delivery, StreamEvent};
use crate::state::AppState;
use crate::types::Snapshot;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn spawn_sampler(state: AppState, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(state, token))
}

async fn run(state: AppState, token: CancellationToken) {
    let refresh = state.config.refresh;
    let heartbeat = state.config.heartbeat;

    // A slow tick delays the next one instead of causing a burst.
    let mut tick = interval(refresh);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut hb = interval_at(Instant::now() + heartbeat, heartbeat);
    hb.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        refresh_ms = refresh.as_millis() as u64,
        heartbeat_ms = heartbeat.as_millis() as u64,
        "sampler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tick.tick() => {
                let snap = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    snap = state.aggregator.aggregate() => snap,
                };
                let d = publish(&state, &snap).await;
                debug!(
                    delivered = d.delivered,
                    dropped = d.dropped,
                    removed = d.removed,
                    "tick published"
                );
            }
            _ = hb.tick() => {
                let ev = StreamEvent::Heartbeat(Utc::now().timestamp_millis());
                state.registry.broadcast(&ev);
            }
        }
    }

    let closed = state.registry.close_all();
    info!(closed, "sampler stopped");
}

/// Cache `snap` as the latest frame and offer it to every connection. A
/// snapshot that cannot be serialized is sent as an error event instead.
pub async fn publish(state: &AppState, snap: &Snapshot) -> Delivery {
    match serde_json::to_string(snap) {
        Ok(js) => {
            let frame: Arc<str> = js.into();
            state.store_frame(frame.clone()).await;
            state.registry.broadcast(&StreamEvent::Snapshot(frame))
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize snapshot");
            let msg: Arc<str> = format!("failed to serialize snapshot: {e}").into();
            state.registry.broadcast(&StreamEvent::Error(msg))
        }
    }
}
