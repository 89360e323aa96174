//! The event-store trait over the three approval queues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use keybridge_types::{EventId, RequestRecord, Timestamp};

use crate::error::StoreError;
use crate::feed::ChangeFeed;

/// The three named queues a record can live in.
///
/// A record exists in exactly one queue at a time and moves strictly
/// forward: `Pending` → `AwaitingApproval` → `Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Queue {
    Pending,
    AwaitingApproval,
    Completed,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Completed => "completed",
        }
    }

    pub fn all() -> &'static [Queue] {
        &[Self::Pending, Self::AwaitingApproval, Self::Completed]
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting-approval" => Ok(Self::AwaitingApproval),
            "completed" => Ok(Self::Completed),
            other => Err(StoreError::NotFound(format!("queue '{other}'"))),
        }
    }
}

/// Durable storage for request records.
///
/// Implementations must guarantee that a record id is unique across all
/// three queues combined, and must publish every mutation on their
/// [`ChangeFeed`].
pub trait EventStore: Send + Sync {
    /// Insert a record. Fails with [`StoreError::Duplicate`] if the id
    /// already exists in any queue.
    fn add(&self, queue: Queue, record: &RequestRecord) -> Result<(), StoreError>;

    /// All records in a queue, oldest first.
    fn get_all(&self, queue: Queue) -> Result<Vec<RequestRecord>, StoreError>;

    /// Fetch one record by id from a specific queue.
    fn get_by_id(&self, queue: Queue, id: &EventId) -> Result<RequestRecord, StoreError>;

    /// Replace a record in place. The update must pass [`validate_update`].
    fn update_by_id(
        &self,
        queue: Queue,
        id: &EventId,
        record: &RequestRecord,
    ) -> Result<(), StoreError>;

    /// Remove a record. Fails with [`StoreError::NotFound`] for unknown ids.
    fn remove_by_id(&self, queue: Queue, id: &EventId) -> Result<(), StoreError>;

    /// Find a record in whichever queue currently holds it.
    fn locate(&self, id: &EventId) -> Result<Option<(Queue, RequestRecord)>, StoreError>;

    /// Number of records in a queue.
    fn count(&self, queue: Queue) -> Result<u64, StoreError>;

    /// Delete completed records older than `window_ms`. Returns how many
    /// were purged. Invoked by viewers when they read the completed queue.
    fn purge_completed_older_than(
        &self,
        window_ms: u64,
        now: Timestamp,
    ) -> Result<u64, StoreError>;

    /// The live change feed for this store.
    fn feed(&self) -> &ChangeFeed;

    /// Move a record from one queue to another, applying `record` as the
    /// new contents. Implemented as remove + add; backends may override
    /// with an atomic version.
    fn move_record(
        &self,
        from: Queue,
        to: Queue,
        record: &RequestRecord,
    ) -> Result<(), StoreError> {
        self.remove_by_id(from, &record.id)?;
        self.add(to, record)
    }
}

/// Shared update validation: status must stay put or advance one legal
/// step, and completed records are immutable. Backends call this before
/// overwriting a record.
pub fn validate_update(old: &RequestRecord, new: &RequestRecord) -> Result<(), StoreError> {
    if old.id != new.id {
        return Err(StoreError::InvalidTransition(format!(
            "id mismatch: {} vs {}",
            old.id, new.id
        )));
    }
    if old.status.is_terminal() {
        return Err(StoreError::InvalidTransition(format!(
            "record {} is completed and immutable",
            old.id
        )));
    }
    if old.status != new.status && !old.status.can_advance_to(new.status) {
        return Err(StoreError::InvalidTransition(format!(
            "record {}: {} -> {}",
            old.id, old.status, new.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_types::{ChainFamily, NetworkId, RequestMetadata, RequestStatus};

    fn record() -> RequestRecord {
        RequestRecord::new(
            NetworkId::eip155(1),
            ChainFamily::Ethereum,
            "transfer",
            serde_json::json!({}),
            RequestMetadata::default(),
        )
    }

    #[test]
    fn queue_names_round_trip() {
        for q in Queue::all() {
            assert_eq!(q.as_str().parse::<Queue>().unwrap(), *q);
        }
        assert!("backlog".parse::<Queue>().is_err());
    }

    #[test]
    fn update_validation_accepts_same_status_and_forward_step() {
        let old = record();
        let mut new = old.clone();
        validate_update(&old, &new).unwrap();
        new.advance(RequestStatus::Approval).unwrap();
        validate_update(&old, &new).unwrap();
    }

    #[test]
    fn update_validation_rejects_regression_and_id_swap() {
        let mut old = record();
        old.advance(RequestStatus::Approval).unwrap();
        let mut new = old.clone();
        new.status = RequestStatus::Request;
        assert!(matches!(
            validate_update(&old, &new),
            Err(StoreError::InvalidTransition(_))
        ));

        let other = record();
        assert!(matches!(
            validate_update(&old, &other),
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[test]
    fn completed_records_cannot_be_updated() {
        let mut old = record();
        old.advance(RequestStatus::Approval).unwrap();
        old.advance(RequestStatus::Completed).unwrap();
        let new = old.clone();
        assert!(matches!(
            validate_update(&old, &new),
            Err(StoreError::InvalidTransition(_))
        ));
    }
}
