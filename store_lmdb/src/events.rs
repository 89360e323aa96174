//! `EventStore` implementation over the LMDB environment.

use keybridge_store::{
    validate_update, ChangeFeed, ChangeKind, EventStore, Queue, StoreError,
};
use keybridge_types::{EventId, RequestRecord, Timestamp};

use crate::environment::LmdbEventStore;
use crate::LmdbError;

impl LmdbEventStore {
    /// Whether `id` exists in any queue, checked inside `txn`.
    fn exists_anywhere(&self, txn: &heed::RoTxn<'_>, id: &EventId) -> Result<bool, LmdbError> {
        for queue in Queue::all() {
            if self.db_for(*queue).get(txn, id.as_str())?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl EventStore for LmdbEventStore {
    fn add(&self, queue: Queue, record: &RequestRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(LmdbError::from)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.exists_anywhere(&wtxn, &record.id)? {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        self.db_for(queue)
            .put(&mut wtxn, record.id.as_str(), &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        self.feed.publish(queue, ChangeKind::Added, record.clone());
        Ok(())
    }

    fn get_all(&self, queue: Queue) -> Result<Vec<RequestRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self.db_for(queue).iter(&rtxn).map_err(LmdbError::from)?;
        let mut records = Vec::new();
        for result in iter {
            let (_id, bytes) = result.map_err(LmdbError::from)?;
            let record: RequestRecord =
                serde_json::from_slice(bytes).map_err(LmdbError::from)?;
            records.push(record);
        }
        // Keys are random hex, so iteration order is arbitrary.
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    fn get_by_id(&self, queue: Queue, id: &EventId) -> Result<RequestRecord, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bytes = self
            .db_for(queue)
            .get(&rtxn, id.as_str())
            .map_err(LmdbError::from)?
            .ok_or_else(|| LmdbError::NotFound(id.to_string()))?;
        let record = serde_json::from_slice(bytes).map_err(LmdbError::from)?;
        Ok(record)
    }

    fn update_by_id(
        &self,
        queue: Queue,
        id: &EventId,
        record: &RequestRecord,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(LmdbError::from)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let db = self.db_for(queue);
        let old_bytes = db
            .get(&wtxn, id.as_str())
            .map_err(LmdbError::from)?
            .ok_or_else(|| LmdbError::NotFound(id.to_string()))?;
        let old: RequestRecord = serde_json::from_slice(old_bytes).map_err(LmdbError::from)?;
        validate_update(&old, record)?;
        db.put(&mut wtxn, id.as_str(), &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        self.feed
            .publish(queue, ChangeKind::Updated, record.clone());
        Ok(())
    }

    fn remove_by_id(&self, queue: Queue, id: &EventId) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let db = self.db_for(queue);
        let old_bytes = db
            .get(&wtxn, id.as_str())
            .map_err(LmdbError::from)?
            .ok_or_else(|| LmdbError::NotFound(id.to_string()))?;
        let old: RequestRecord = serde_json::from_slice(old_bytes).map_err(LmdbError::from)?;
        db.delete(&mut wtxn, id.as_str()).map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        self.feed.publish(queue, ChangeKind::Removed, old);
        Ok(())
    }

    fn locate(&self, id: &EventId) -> Result<Option<(Queue, RequestRecord)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        for queue in Queue::all() {
            if let Some(bytes) = self
                .db_for(*queue)
                .get(&rtxn, id.as_str())
                .map_err(LmdbError::from)?
            {
                let record = serde_json::from_slice(bytes).map_err(LmdbError::from)?;
                return Ok(Some((*queue, record)));
            }
        }
        Ok(None)
    }

    fn count(&self, queue: Queue) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let n = self.db_for(queue).len(&rtxn).map_err(LmdbError::from)?;
        Ok(n)
    }

    fn purge_completed_older_than(
        &self,
        window_ms: u64,
        now: Timestamp,
    ) -> Result<u64, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let db = self.db_for(Queue::Completed);

        let mut aged: Vec<RequestRecord> = Vec::new();
        {
            let iter = db.iter(&wtxn).map_err(LmdbError::from)?;
            for result in iter {
                let (_id, bytes) = result.map_err(LmdbError::from)?;
                let record: RequestRecord =
                    serde_json::from_slice(bytes).map_err(LmdbError::from)?;
                if record.timestamp.is_older_than(window_ms, now) {
                    aged.push(record);
                }
            }
        }
        for record in &aged {
            db.delete(&mut wtxn, record.id.as_str())
                .map_err(LmdbError::from)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;

        for record in &aged {
            self.feed
                .publish(Queue::Completed, ChangeKind::Removed, record.clone());
        }
        Ok(aged.len() as u64)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn move_record(
        &self,
        from: Queue,
        to: Queue,
        record: &RequestRecord,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(LmdbError::from)?;
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;

        let from_db = self.db_for(from);
        let old_bytes = from_db
            .get(&wtxn, record.id.as_str())
            .map_err(LmdbError::from)?
            .ok_or_else(|| LmdbError::NotFound(record.id.to_string()))?;
        let old: RequestRecord = serde_json::from_slice(old_bytes).map_err(LmdbError::from)?;
        validate_update(&old, record)?;

        from_db
            .delete(&mut wtxn, record.id.as_str())
            .map_err(LmdbError::from)?;
        self.db_for(to)
            .put(&mut wtxn, record.id.as_str(), &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        self.feed.publish(from, ChangeKind::Removed, old);
        self.feed.publish(to, ChangeKind::Added, record.clone());
        Ok(())
    }
}
