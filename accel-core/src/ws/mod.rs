//! Broadcast hub for status/notification events pushed to admin clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    CacheStats {
        total_size: u64,
        max_size: u64,
        entry_count: usize,
        at: DateTime<Utc>,
    },
    LockStateChanged {
        locked: bool,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    PeerJoined {
        peer_id: String,
        at: DateTime<Utc>,
    },
    PeerLeft {
        peer_id: String,
        at: DateTime<Utc>,
    },
    TufRepublished {
        role: String,
        version: u64,
        at: DateTime<Utc>,
    },
    AutomationTaskCompleted {
        task_id: String,
        status: String,
        at: DateTime<Utc>,
    },
    BlobAnnounced {
        digest: String,
        node_id: String,
        at: DateTime<Utc>,
    },
}

/// Wraps a `tokio::sync::broadcast::Sender<WsEvent>`. Lagging subscribers
/// miss events rather than blocking publishers; that's the broadcast
/// channel's standard behavior and is acceptable for status notifications.
#[derive(Clone)]
pub struct WsHub {
    sender: broadcast::Sender<WsEvent>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of receivers that saw the event; zero if no one
    /// is currently subscribed.
    pub fn broadcast(&self, event: WsEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_broadcast_events() {
        let hub = WsHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        let sent = hub.broadcast(WsEvent::PeerJoined {
            peer_id: "abc".to_string(),
            at: Utc::now(),
        });
        assert_eq!(sent, 2);

        let ev1 = rx1.recv().await.unwrap();
        let ev2 = rx2.recv().await.unwrap();
        assert!(matches!(ev1, WsEvent::PeerJoined { .. }));
        assert!(matches!(ev2, WsEvent::PeerJoined { .. }));
    }

    #[test]
    fn broadcast_with_no_subscribers_returns_zero() {
        let hub = WsHub::new();
        let sent = hub.broadcast(WsEvent::LockStateChanged {
            locked: true,
            reason: None,
            at: Utc::now(),
        });
        assert_eq!(sent, 0);
    }
}
