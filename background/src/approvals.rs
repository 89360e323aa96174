//! The approval gate.
//!
//! The single state machine mediating "a chain handler wants user consent
//! for payload P". The gate persists the pending record, opens the user
//! approval surface (by broadcasting a prompt the surface reacts to), and
//! suspends the calling handler until a decision message correlated by the
//! record id arrives. Each invocation resolves exactly once.
//!
//! Concurrent invocations are legal: each has its own record id and its own
//! one-shot waiter. The surface presents records one at a time, but the
//! gate does not serialize calls itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use keybridge_messages::{ApprovalDecision, Decision};
use keybridge_store::{EventStore, Queue, StoreError};
use keybridge_types::{ChainFamily, EventId, NetworkId, ProviderError, RequestRecord, RequestStatus};

use crate::metrics::PipelineMetrics;

/// A prompt telling the approval surface to present a record.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ApprovalPrompt {
    pub event_id: EventId,
    pub network_id: NetworkId,
    pub chain: ChainFamily,
    pub method: String,
}

/// The gate's resolution for one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub success: bool,
}

pub struct ApprovalGate {
    store: Arc<dyn EventStore>,
    metrics: Arc<PipelineMetrics>,
    waiters: Mutex<HashMap<EventId, oneshot::Sender<Decision>>>,
    prompt_tx: broadcast::Sender<ApprovalPrompt>,
    /// Whether an approval surface is currently presented. Owned here, not
    /// a process-wide flag, so separate gate instances cannot interfere.
    surface_open: Mutex<bool>,
    /// Maximum time a gate invocation may stay pending. `None` waits
    /// forever, matching the historical behaviour.
    timeout: Option<Duration>,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<dyn EventStore>,
        metrics: Arc<PipelineMetrics>,
        timeout: Option<Duration>,
    ) -> Self {
        let (prompt_tx, _) = broadcast::channel(64);
        Self {
            store,
            metrics,
            waiters: Mutex::new(HashMap::new()),
            prompt_tx,
            surface_open: Mutex::new(false),
            timeout,
        }
    }

    /// Subscribe to approval prompts (consumed by the surface).
    pub fn subscribe_prompts(&self) -> broadcast::Receiver<ApprovalPrompt> {
        self.prompt_tx.subscribe()
    }

    /// Whether a surface is currently presented.
    pub fn is_surface_open(&self) -> bool {
        *self.surface_open.lock().unwrap()
    }

    /// Persist `record` into the pending queue, open the approval surface,
    /// and suspend until the correlated decision arrives.
    ///
    /// On approval the record advances to `approval` status and moves to
    /// the awaiting-approval queue. On denial (or timeout, when configured)
    /// the record is removed from the pending queue.
    pub async fn require_approval(
        &self,
        mut record: RequestRecord,
    ) -> Result<ApprovalOutcome, ProviderError> {
        let id = record.id.clone();
        self.store
            .add(Queue::Pending, &record)
            .map_err(store_err)?;
        self.metrics.approvals_requested.inc();
        self.metrics
            .pending_records
            .set(self.store.count(Queue::Pending).unwrap_or(0) as i64);

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id.clone(), tx);

        *self.surface_open.lock().unwrap() = true;
        let _ = self.prompt_tx.send(ApprovalPrompt {
            event_id: id.clone(),
            network_id: record.network_id.clone(),
            chain: record.chain,
            method: record.method.clone(),
        });
        info!(event_id = %id, method = %record.method, "approval requested");

        let decision = match self.timeout {
            Some(window) => match tokio::time::timeout(window, rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    warn!(event_id = %id, "approval timed out");
                    self.metrics.approval_timeouts.inc();
                    self.waiters.lock().unwrap().remove(&id);
                    None
                }
            },
            None => rx.await.ok(),
        };

        let outcome = match decision {
            Some(Decision::Accept) => {
                record
                    .advance(RequestStatus::Approval)
                    .map_err(|e| ProviderError::upstream(e.to_string()))?;
                self.store
                    .move_record(Queue::Pending, Queue::AwaitingApproval, &record)
                    .map_err(store_err)?;
                self.metrics.approvals_granted.inc();
                ApprovalOutcome { success: true }
            }
            Some(Decision::Reject) | Some(Decision::Closed) | None => {
                // Denied, cancelled, or timed out: discard the pending record.
                if let Err(e) = self.store.remove_by_id(Queue::Pending, &id) {
                    warn!(event_id = %id, "failed to discard denied record: {e}");
                }
                self.metrics.approvals_denied.inc();
                ApprovalOutcome { success: false }
            }
        };

        self.metrics
            .pending_records
            .set(self.store.count(Queue::Pending).unwrap_or(0) as i64);
        Ok(outcome)
    }

    /// Deliver a decision from the surface. Returns whether a waiter was
    /// pending for the id — a duplicate or unknown decision is a no-op.
    pub fn decide(&self, decision: ApprovalDecision) -> bool {
        let waiter = self.waiters.lock().unwrap().remove(&decision.event_id);
        match waiter {
            Some(tx) => tx.send(decision.decision).is_ok(),
            None => false,
        }
    }

    /// The surface was closed without an explicit choice: resolve every
    /// pending waiter as rejected so no handler hangs forever.
    pub fn surface_closed(&self) {
        *self.surface_open.lock().unwrap() = false;
        let drained: Vec<(EventId, oneshot::Sender<Decision>)> =
            self.waiters.lock().unwrap().drain().collect();
        for (id, tx) in drained {
            info!(event_id = %id, "surface closed, cancelling pending approval");
            let _ = tx.send(Decision::Closed);
        }
    }

    /// Number of gate invocations currently suspended.
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

fn store_err(e: StoreError) -> ProviderError {
    ProviderError::upstream(format!("event store failure: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_types::{NetworkId, RequestMetadata};

    fn record() -> RequestRecord {
        RequestRecord::new(
            NetworkId::eip155(1),
            ChainFamily::Ethereum,
            "personal_sign",
            serde_json::json!(["hello", null]),
            RequestMetadata::default(),
        )
    }

    fn gate(timeout: Option<Duration>) -> (Arc<ApprovalGate>, Arc<dyn EventStore>) {
        let store: Arc<dyn EventStore> =
            Arc::new(keybridge_nullables::NullEventStore::new());
        let metrics = Arc::new(PipelineMetrics::new());
        (
            Arc::new(ApprovalGate::new(store.clone(), metrics, timeout)),
            store,
        )
    }

    #[tokio::test]
    async fn accept_moves_record_forward() {
        let (gate, store) = gate(None);
        let r = record();
        let id = r.id.clone();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.require_approval(r).await })
        };

        // The record appears in the pending queue before the gate suspends.
        while store.count(Queue::Pending).unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(gate.decide(ApprovalDecision {
            event_id: id.clone(),
            decision: Decision::Accept,
        }));
        let outcome = waiter.await.unwrap().unwrap();
        assert!(outcome.success);

        let (queue, stored) = store.locate(&id).unwrap().expect("record present");
        assert_eq!(queue, Queue::AwaitingApproval);
        assert_eq!(stored.status, RequestStatus::Approval);
    }

    #[tokio::test]
    async fn reject_discards_the_pending_record() {
        let (gate, store) = gate(None);
        let r = record();
        let id = r.id.clone();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.require_approval(r).await })
        };
        while store.count(Queue::Pending).unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(gate.decide(ApprovalDecision {
            event_id: id.clone(),
            decision: Decision::Reject,
        }));
        let outcome = waiter.await.unwrap().unwrap();
        assert!(!outcome.success);
        assert!(store.locate(&id).unwrap().is_none());

        // A duplicate decision for the same id is a no-op.
        assert!(!gate.decide(ApprovalDecision {
            event_id: id,
            decision: Decision::Accept,
        }));
    }

    #[tokio::test]
    async fn timeout_resolves_as_denied() {
        let (gate, store) = gate(Some(Duration::from_millis(20)));
        let r = record();
        let id = r.id.clone();

        let outcome = gate.require_approval(r).await.unwrap();
        assert!(!outcome.success);
        assert!(store.locate(&id).unwrap().is_none());
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn surface_closed_cancels_all_waiters() {
        let (gate, store) = gate(None);
        let first = record();
        let second = record();

        let w1 = {
            let gate = gate.clone();
            let r = first.clone();
            tokio::spawn(async move { gate.require_approval(r).await })
        };
        let w2 = {
            let gate = gate.clone();
            let r = second.clone();
            tokio::spawn(async move { gate.require_approval(r).await })
        };
        while store.count(Queue::Pending).unwrap() < 2 {
            tokio::task::yield_now().await;
        }

        gate.surface_closed();
        assert!(!w1.await.unwrap().unwrap().success);
        assert!(!w2.await.unwrap().unwrap().success);
        assert!(!gate.is_surface_open());
    }

    #[tokio::test]
    async fn concurrent_gates_are_independent() {
        let (gate, store) = gate(None);
        let first = record();
        let second = record();
        let first_id = first.id.clone();
        let second_id = second.id.clone();

        let w1 = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.require_approval(first).await })
        };
        let w2 = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.require_approval(second).await })
        };
        while store.count(Queue::Pending).unwrap() < 2 {
            tokio::task::yield_now().await;
        }

        // Approving the second does not affect the first's pending state.
        assert!(gate.decide(ApprovalDecision {
            event_id: second_id,
            decision: Decision::Accept,
        }));
        assert!(w2.await.unwrap().unwrap().success);
        assert_eq!(store.count(Queue::Pending).unwrap(), 1);
        assert_eq!(gate.pending_count(), 1);

        assert!(gate.decide(ApprovalDecision {
            event_id: first_id,
            decision: Decision::Reject,
        }));
        assert!(!w1.await.unwrap().unwrap().success);
        assert_eq!(store.count(Queue::Pending).unwrap(), 0);
    }
}
