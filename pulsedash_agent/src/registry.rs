//! Live stream connections and fan-out delivery.
//!
//! Each subscriber gets its own bounded channel. Delivery never waits: a full
//! channel loses that event for that subscriber only, and a subscriber that
//! stays full for `max_lagged` consecutive deliveries is dropped. Dropping
//! the sender ends the subscriber's stream, and every removal cancels the
//! connection's token.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One frame for a stream subscriber. Payloads are shared, not copied per
/// connection.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Serialized snapshot JSON.
    Snapshot(Arc<str>),
    /// Keep-alive carrying the unix time in milliseconds.
    Heartbeat(i64),
    /// A tick that could not be produced; the message is shown to clients.
    Error(Arc<str>),
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Fires once the connection is removed, by either side.
    pub cancel: CancellationToken,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

struct Slot {
    tx: mpsc::Sender<StreamEvent>,
    lagged: u32,
    cancel: CancellationToken,
}

struct Inner {
    conns: Mutex<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    buffer: usize,
    max_lagged: u32,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(buffer: usize, max_lagged: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                conns: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                max_lagged: max_lagged.max(1),
            }),
        }
    }

    fn conns(&self) -> MutexGuard<'_, HashMap<u64, Slot>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner
            .conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> (ConnectionHandle, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle {
            id,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        };
        let slot = Slot {
            tx,
            lagged: 0,
            cancel: handle.cancel.clone(),
        };
        let live = {
            let mut conns = self.conns();
            conns.insert(id, slot);
            conns.len()
        };
        info!(conn = id, live, "stream client connected");
        (handle, rx)
    }

    /// Remove a connection. Returns false if it was already gone, so repeated
    /// calls are harmless.
    pub fn unsubscribe(&self, handle: &ConnectionHandle) -> bool {
        let (removed, live) = {
            let mut conns = self.conns();
            let removed = conns.remove(&handle.id).is_some();
            (removed, conns.len())
        };
        handle.cancel.cancel();
        if removed {
            let secs = (Utc::now() - handle.created_at).num_seconds();
            info!(conn = handle.id, live, connected_secs = secs, "stream client disconnected");
        }
        removed
    }

    /// Offer `ev` to every connection without waiting.
    pub fn broadcast(&self, ev: &StreamEvent) -> Delivery {
        let max_lagged = self.inner.max_lagged;
        let mut out = Delivery::default();
        let mut conns = self.conns();
        conns.retain(|id, slot| {
            if slot.cancel.is_cancelled() {
                out.removed += 1;
                return false;
            }
            let keep = deliver(*id, slot, ev, max_lagged, &mut out);
            if !keep {
                slot.cancel.cancel();
            }
            keep
        });
        out
    }

    pub fn len(&self) -> usize {
        self.conns().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every connection; their streams end once buffered events drain.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut conns = self.conns();
            for slot in conns.values() {
                slot.cancel.cancel();
            }
            let n = conns.len();
            conns.clear();
            n
        };
        if closed > 0 {
            info!(closed, "closed all stream clients");
        }
        closed
    }
}

fn deliver(
    id: u64,
    slot: &mut Slot,
    ev: &StreamEvent,
    max_lagged: u32,
    out: &mut Delivery,
) -> bool {
    match slot.tx.try_send(ev.clone()) {
        Ok(()) => {
            slot.lagged = 0;
            out.delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            slot.lagged += 1;
            out.dropped += 1;
            if slot.lagged >= max_lagged {
                warn!(conn = id, lagged = slot.lagged, "dropping lagging stream client");
                out.removed += 1;
                false
            } else {
                true
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(conn = id, "stream client went away");
            out.removed += 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(s: &str) -> StreamEvent {
        StreamEvent::Snapshot(Arc::from(s))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let reg = ConnectionRegistry::new(4, 3);
        let (_a, mut rx_a) = reg.subscribe();
        let (_b, mut rx_b) = reg.subscribe();
        let d = reg.broadcast(&frame("{}"));
        assert_eq!(d.delivered, 2);
        assert_eq!(rx_a.recv().await, Some(frame("{}")));
        assert_eq!(rx_b.recv().await, Some(frame("{}")));
    }

    #[test]
    fn ids_are_unique() {
        let reg = ConnectionRegistry::new(1, 1);
        let (a, _ra) = reg.subscribe();
        let (b, _rb) = reg.subscribe();
        assert_ne!(a.id, b.id);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let reg = ConnectionRegistry::new(1, 1);
        let (h, _rx) = reg.subscribe();
        assert!(reg.unsubscribe(&h));
        assert!(!reg.unsubscribe(&h));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn closed_receiver_is_removed_and_others_keep_receiving() {
        let reg = ConnectionRegistry::new(4, 3);
        let (_a, rx_a) = reg.subscribe();
        let (_b, mut rx_b) = reg.subscribe();
        drop(rx_a);

        let d = reg.broadcast(&frame("1"));
        assert_eq!(d.removed, 1);
        assert_eq!(d.delivered, 1);
        assert_eq!(reg.len(), 1);

        reg.broadcast(&frame("2"));
        assert_eq!(rx_b.recv().await, Some(frame("1")));
        assert_eq!(rx_b.recv().await, Some(frame("2")));
    }

    #[tokio::test]
    async fn full_channel_drops_then_removes_after_max_lagged() {
        let reg = ConnectionRegistry::new(1, 2);
        let (_slow, mut rx_slow) = reg.subscribe();
        let (_fast, mut rx_fast) = reg.subscribe();

        assert_eq!(reg.broadcast(&frame("1")).delivered, 2);
        rx_fast.recv().await;

        // slow never reads: first miss is tolerated, second removes it.
        let d = reg.broadcast(&frame("2"));
        assert_eq!((d.delivered, d.dropped, d.removed), (1, 1, 0));
        rx_fast.recv().await;
        let d = reg.broadcast(&frame("3"));
        assert_eq!((d.delivered, d.dropped, d.removed), (1, 1, 1));
        assert_eq!(reg.len(), 1);

        // The removed subscriber still drains what it had, then ends.
        assert_eq!(rx_slow.recv().await, Some(frame("1")));
        assert_eq!(rx_slow.recv().await, None);
        assert_eq!(rx_fast.recv().await, Some(frame("3")));
    }

    #[tokio::test]
    async fn successful_delivery_resets_lag() {
        let reg = ConnectionRegistry::new(1, 2);
        let (_h, mut rx) = reg.subscribe();
        reg.broadcast(&frame("1"));
        reg.broadcast(&frame("2")); // dropped, lag 1
        rx.recv().await;
        reg.broadcast(&frame("3")); // delivered, lag reset
        reg.broadcast(&frame("4")); // dropped, lag 1 again
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let reg = ConnectionRegistry::new(2, 2);
        let (_a, mut rx_a) = reg.subscribe();
        let (_b, mut rx_b) = reg.subscribe();
        assert_eq!(reg.close_all(), 2);
        assert!(reg.is_empty());
        assert_eq!(rx_a.recv().await, None);
        assert_eq!(rx_b.recv().await, None);
    }

    #[tokio::test]
    async fn cancelled_handle_is_skipped_and_released() {
        let reg = ConnectionRegistry::new(4, 3);
        let (h, mut rx) = reg.subscribe();
        h.cancel.cancel();
        let d = reg.broadcast(&frame("x"));
        assert_eq!((d.delivered, d.removed), (0, 1));
        assert!(reg.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn every_removal_path_fires_the_token() {
        let reg = ConnectionRegistry::new(1, 1);
        let (gone, _rx_gone) = reg.subscribe();
        let (lagging, _rx_lagging) = reg.subscribe();
        let (open, mut rx_open) = reg.subscribe();

        reg.unsubscribe(&gone);
        assert!(gone.cancel.is_cancelled());

        reg.broadcast(&frame("1"));
        rx_open.recv().await;
        assert!(!lagging.cancel.is_cancelled());
        reg.broadcast(&frame("2"));
        rx_open.recv().await;
        assert!(lagging.cancel.is_cancelled());
        assert!(!open.cancel.is_cancelled());

        reg.close_all();
        assert!(open.cancel.is_cancelled());
    }
}
