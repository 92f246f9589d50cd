use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// What happened to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single change event in the watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub kind: EventKind,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// Change log attached to a store: every mutation gets a monotonic sequence
/// number, is kept in a bounded ring of recent events, and is fanned out to
/// live subscribers.
///
/// A watch is restartable: a consumer that remembers the last sequence
/// number it saw can re-subscribe and replay the gap with [`EventLog::events_since`],
/// provided the gap still fits in the ring.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<Ring>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct Ring {
    seq: u64,
    events: VecDeque<WatchEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Ring {
                seq: 0,
                events: VecDeque::with_capacity(capacity),
                capacity,
            })),
            sender,
        }
    }

    /// Record a mutation. Called by store implementations on put/delete.
    pub async fn record(&self, kind: EventKind, key: String, value: Option<Vec<u8>>) {
        let mut ring = self.inner.write().await;
        ring.seq += 1;
        let event = WatchEvent {
            seq: ring.seq,
            kind,
            key,
            value,
        };
        if ring.events.len() >= ring.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event.clone());
        // No receivers is fine; send only fails then.
        let _ = self.sender.send(event);
    }

    /// Sequence number of the most recent event.
    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Replay buffered events newer than `from_seq`, oldest first.
    pub async fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let ring = self.inner.read().await;
        ring.events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    /// Subscribe to events recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequences_are_monotonic_and_replayable() {
        let log = EventLog::new(16);
        log.record(EventKind::Put, "/a".into(), Some(b"1".to_vec()))
            .await;
        log.record(EventKind::Put, "/b".into(), Some(b"2".to_vec()))
            .await;
        log.record(EventKind::Delete, "/a".into(), None).await;

        assert_eq!(log.current_seq().await, 3);
        let replay = log.events_since(1).await;
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].key, "/b");
        assert_eq!(replay[1].kind, EventKind::Delete);
    }

    #[tokio::test]
    async fn ring_drops_oldest_when_full() {
        let log = EventLog::new(2);
        for key in ["/a", "/b", "/c"] {
            log.record(EventKind::Put, key.into(), None).await;
        }
        let all = log.events_since(0).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "/b");
        // Sequence numbers keep counting even after eviction.
        assert_eq!(log.current_seq().await, 3);
    }

    #[tokio::test]
    async fn subscribers_receive_live_events() {
        let log = EventLog::new(4);
        let mut rx = log.subscribe();
        log.record(EventKind::Put, "/x".into(), Some(b"v".to_vec()))
            .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "/x");
        assert_eq!(event.value.as_deref(), Some(b"v".as_ref()));
    }
}
