//! Live store-change notifications.
//!
//! Approval surfaces subscribe here to react to new pending records
//! without polling. Delivery is best-effort: a lagging subscriber misses
//! changes rather than blocking writers.

use serde::Serialize;
use tokio::sync::broadcast;

use keybridge_types::RequestRecord;

use crate::events::Queue;

/// What happened to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// A single store mutation, as delivered to subscribers.
#[derive(Clone, Debug, Serialize)]
pub struct StoreChange {
    pub queue: Queue,
    pub kind: ChangeKind,
    pub record: RequestRecord,
}

/// Broadcast fan-out of store mutations.
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreChange>,
}

impl ChangeFeed {
    /// Create a feed with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get a receiver for subsequent changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }

    /// Publish a change. Silently dropped when no subscriber is listening.
    pub fn publish(&self, queue: Queue, kind: ChangeKind, record: RequestRecord) {
        let _ = self.tx.send(StoreChange {
            queue,
            kind,
            record,
        });
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_types::{ChainFamily, NetworkId, RequestMetadata, RequestRecord};

    fn record() -> RequestRecord {
        RequestRecord::new(
            NetworkId::eip155(1),
            ChainFamily::Ethereum,
            "transfer",
            serde_json::json!({}),
            RequestMetadata::default(),
        )
    }

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let feed = ChangeFeed::new(8);
        let mut rx = feed.subscribe();
        let r = record();
        feed.publish(Queue::Pending, ChangeKind::Added, r.clone());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.queue, Queue::Pending);
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.record.id, r.id);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let feed = ChangeFeed::new(8);
        feed.publish(Queue::Completed, ChangeKind::Removed, record());
    }
}
