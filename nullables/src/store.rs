//! Nullable event store — thread-safe in-memory queues for testing.

use std::collections::HashMap;
use std::sync::Mutex;

use keybridge_store::{
    validate_update, ChangeFeed, ChangeKind, EventStore, Queue, StoreError,
};
use keybridge_types::{EventId, RequestRecord, Timestamp};

/// An in-memory event store. Thread-safe for use with tokio's
/// multi-threaded runtime.
pub struct NullEventStore {
    queues: Mutex<HashMap<Queue, HashMap<String, RequestRecord>>>,
    feed: ChangeFeed,
}

impl NullEventStore {
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for queue in Queue::all() {
            queues.insert(*queue, HashMap::new());
        }
        Self {
            queues: Mutex::new(queues),
            feed: ChangeFeed::default(),
        }
    }
}

impl Default for NullEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for NullEventStore {
    fn add(&self, queue: Queue, record: &RequestRecord) -> Result<(), StoreError> {
        let mut queues = self.queues.lock().unwrap();
        let exists = queues
            .values()
            .any(|q| q.contains_key(record.id.as_str()));
        if exists {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        queues
            .get_mut(&queue)
            .expect("all queues initialised")
            .insert(record.id.to_string(), record.clone());
        drop(queues);
        self.feed.publish(queue, ChangeKind::Added, record.clone());
        Ok(())
    }

    fn get_all(&self, queue: Queue) -> Result<Vec<RequestRecord>, StoreError> {
        let queues = self.queues.lock().unwrap();
        let mut records: Vec<RequestRecord> = queues[&queue].values().cloned().collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn get_by_id(&self, queue: Queue, id: &EventId) -> Result<RequestRecord, StoreError> {
        self.queues.lock().unwrap()[&queue]
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update_by_id(
        &self,
        queue: Queue,
        id: &EventId,
        record: &RequestRecord,
    ) -> Result<(), StoreError> {
        let mut queues = self.queues.lock().unwrap();
        let slot = queues
            .get_mut(&queue)
            .expect("all queues initialised")
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        validate_update(slot, record)?;
        *slot = record.clone();
        drop(queues);
        self.feed
            .publish(queue, ChangeKind::Updated, record.clone());
        Ok(())
    }

    fn remove_by_id(&self, queue: Queue, id: &EventId) -> Result<(), StoreError> {
        let removed = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&queue)
            .expect("all queues initialised")
            .remove(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.feed.publish(queue, ChangeKind::Removed, removed);
        Ok(())
    }

    fn locate(&self, id: &EventId) -> Result<Option<(Queue, RequestRecord)>, StoreError> {
        let queues = self.queues.lock().unwrap();
        for queue in Queue::all() {
            if let Some(record) = queues[queue].get(id.as_str()) {
                return Ok(Some((*queue, record.clone())));
            }
        }
        Ok(None)
    }

    fn count(&self, queue: Queue) -> Result<u64, StoreError> {
        Ok(self.queues.lock().unwrap()[&queue].len() as u64)
    }

    fn purge_completed_older_than(
        &self,
        window_ms: u64,
        now: Timestamp,
    ) -> Result<u64, StoreError> {
        let aged: Vec<RequestRecord> = {
            let mut queues = self.queues.lock().unwrap();
            let completed = queues
                .get_mut(&Queue::Completed)
                .expect("all queues initialised");
            let ids: Vec<String> = completed
                .values()
                .filter(|r| r.timestamp.is_older_than(window_ms, now))
                .map(|r| r.id.to_string())
                .collect();
            ids.iter()
                .filter_map(|id| completed.remove(id))
                .collect()
        };
        for record in &aged {
            self.feed
                .publish(Queue::Completed, ChangeKind::Removed, record.clone());
        }
        Ok(aged.len() as u64)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}
