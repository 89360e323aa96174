//! Integration tests for the LMDB event store: persistence round-trips,
//! cross-queue uniqueness, forward-only transitions, and retention purge.

use keybridge_store::{ChangeKind, EventStore, Queue, StoreError};
use keybridge_store_lmdb::LmdbEventStore;
use keybridge_types::{
    ChainFamily, EventId, NetworkId, RequestMetadata, RequestRecord, RequestStatus, Timestamp,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_store() -> (tempfile::TempDir, LmdbEventStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = LmdbEventStore::open(dir.path()).expect("open store");
    (dir, store)
}

fn record(method: &str) -> RequestRecord {
    RequestRecord::new(
        NetworkId::eip155(1),
        ChainFamily::Ethereum,
        method,
        serde_json::json!({"to": "0x0", "value": "0x1"}),
        RequestMetadata {
            site_url: "https://app.example".into(),
            user_agent: "test-agent".into(),
            platform: "linux".into(),
            language: "en-US".into(),
            bridge_version: "1.0.0".into(),
            ..Default::default()
        },
    )
}

// ---------------------------------------------------------------------------
// 1. Persistence round-trips
// ---------------------------------------------------------------------------

#[test]
fn add_then_read_back() {
    let (_dir, store) = temp_store();
    let r = record("eth_sendTransaction");
    store.add(Queue::Pending, &r).unwrap();

    let loaded = store.get_by_id(Queue::Pending, &r.id).unwrap();
    assert_eq!(loaded, r);
    assert_eq!(store.count(Queue::Pending).unwrap(), 1);
    assert_eq!(store.count(Queue::Completed).unwrap(), 0);
}

#[test]
fn reopen_preserves_records_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let r = record("transfer");
    {
        let store = LmdbEventStore::open(dir.path()).unwrap();
        store.add(Queue::Pending, &r).unwrap();
    }
    let store = LmdbEventStore::open(dir.path()).unwrap();
    assert_eq!(store.schema_version().unwrap(), 1);
    let loaded = store.get_by_id(Queue::Pending, &r.id).unwrap();
    assert_eq!(loaded.method, "transfer");
}

#[test]
fn get_all_returns_oldest_first() {
    let (_dir, store) = temp_store();
    let mut first = record("transfer");
    first.timestamp = Timestamp::from_millis(1_000);
    let mut second = record("transfer");
    second.timestamp = Timestamp::from_millis(2_000);

    // Insert newest first to prove ordering is by timestamp, not key.
    store.add(Queue::Pending, &second).unwrap();
    store.add(Queue::Pending, &first).unwrap();

    let all = store.get_all(Queue::Pending).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, first.id);
    assert_eq!(all[1].id, second.id);
}

// ---------------------------------------------------------------------------
// 2. Id uniqueness across queues
// ---------------------------------------------------------------------------

#[test]
fn duplicate_id_rejected_in_any_queue() {
    let (_dir, store) = temp_store();
    let r = record("personal_sign");
    store.add(Queue::Pending, &r).unwrap();

    let err = store.add(Queue::Pending, &r).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    let err = store.add(Queue::AwaitingApproval, &r).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[test]
fn locate_finds_record_in_its_queue() {
    let (_dir, store) = temp_store();
    let r = record("personal_sign");
    store.add(Queue::AwaitingApproval, &r).unwrap();

    let (queue, found) = store.locate(&r.id).unwrap().expect("present");
    assert_eq!(queue, Queue::AwaitingApproval);
    assert_eq!(found.id, r.id);
    assert!(store.locate(&EventId::generate()).unwrap().is_none());
}

// ---------------------------------------------------------------------------
// 3. State machine enforcement
// ---------------------------------------------------------------------------

#[test]
fn move_record_advances_queue_and_status() {
    let (_dir, store) = temp_store();
    let mut r = record("eth_sendTransaction");
    store.add(Queue::Pending, &r).unwrap();

    r.advance(RequestStatus::Approval).unwrap();
    store
        .move_record(Queue::Pending, Queue::AwaitingApproval, &r)
        .unwrap();

    assert_eq!(store.count(Queue::Pending).unwrap(), 0);
    let moved = store.get_by_id(Queue::AwaitingApproval, &r.id).unwrap();
    assert_eq!(moved.status, RequestStatus::Approval);
}

#[test]
fn status_regression_is_rejected() {
    let (_dir, store) = temp_store();
    let mut r = record("eth_sendTransaction");
    r.advance(RequestStatus::Approval).unwrap();
    store.add(Queue::AwaitingApproval, &r).unwrap();

    let mut regressed = r.clone();
    regressed.status = RequestStatus::Request;
    let err = store
        .update_by_id(Queue::AwaitingApproval, &r.id, &regressed)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition(_)));
}

#[test]
fn completed_records_are_immutable() {
    let (_dir, store) = temp_store();
    let mut r = record("transfer");
    r.advance(RequestStatus::Approval).unwrap();
    r.advance(RequestStatus::Completed).unwrap();
    store.add(Queue::Completed, &r).unwrap();

    let err = store
        .update_by_id(Queue::Completed, &r.id, &r)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition(_)));
}

#[test]
fn removing_unknown_id_is_not_found() {
    let (_dir, store) = temp_store();
    let err = store
        .remove_by_id(Queue::Pending, &EventId::generate())
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// 4. Retention purge
// ---------------------------------------------------------------------------

#[test]
fn purge_removes_only_aged_completed_records() {
    let (_dir, store) = temp_store();

    let mut old = record("transfer");
    old.advance(RequestStatus::Approval).unwrap();
    old.advance(RequestStatus::Completed).unwrap();
    old.timestamp = Timestamp::from_millis(1_000);
    store.add(Queue::Completed, &old).unwrap();

    let mut fresh = record("transfer");
    fresh.advance(RequestStatus::Approval).unwrap();
    fresh.advance(RequestStatus::Completed).unwrap();
    fresh.timestamp = Timestamp::from_millis(90_000);
    store.add(Queue::Completed, &fresh).unwrap();

    let now = Timestamp::from_millis(100_000);
    let purged = store.purge_completed_older_than(50_000, now).unwrap();
    assert_eq!(purged, 1);

    let remaining = store.get_all(Queue::Completed).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, fresh.id);
}

// ---------------------------------------------------------------------------
// 5. Change feed
// ---------------------------------------------------------------------------

#[test]
fn mutations_are_published_on_the_feed() {
    let (_dir, store) = temp_store();
    let mut rx = store.feed().subscribe();

    let mut r = record("eth_sendTransaction");
    store.add(Queue::Pending, &r).unwrap();
    let change = rx.try_recv().unwrap();
    assert_eq!(change.kind, ChangeKind::Added);
    assert_eq!(change.queue, Queue::Pending);

    r.advance(RequestStatus::Approval).unwrap();
    store
        .move_record(Queue::Pending, Queue::AwaitingApproval, &r)
        .unwrap();
    let removed = rx.try_recv().unwrap();
    assert_eq!(removed.kind, ChangeKind::Removed);
    let added = rx.try_recv().unwrap();
    assert_eq!(added.kind, ChangeKind::Added);
    assert_eq!(added.queue, Queue::AwaitingApproval);
}
