//! The correlation callback map.
//!
//! Maps an outbound request id to the oneshot resolver of the caller.
//! Entries are removed on response arrival or by the timeout sweep, so the
//! map stays bounded even when the relay never answers. Resolution is
//! exactly-once: a late or duplicate response for an already-resolved id is
//! a no-op.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use keybridge_types::ProviderError;

/// What the caller eventually receives.
pub type CallResult = Result<serde_json::Value, ProviderError>;

struct PendingCall {
    resolver: oneshot::Sender<CallResult>,
    created: Instant,
    method: String,
}

/// Thread-safe map of in-flight calls keyed by correlation id.
pub struct CallbackMap {
    inner: Mutex<HashMap<u64, PendingCall>>,
}

impl CallbackMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a call and return the receiving half for the caller to
    /// await.
    pub fn insert(&self, id: u64, method: &str) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(
            id,
            PendingCall {
                resolver: tx,
                created: Instant::now(),
                method: method.to_string(),
            },
        );
        rx
    }

    /// Resolve a call. Returns `false` when the id is unknown (already
    /// resolved, timed out, or never issued) — the response is discarded.
    pub fn resolve(&self, id: u64, result: CallResult) -> bool {
        let entry = self.inner.lock().unwrap().remove(&id);
        match entry {
            Some(call) => {
                // The caller may have dropped its receiver; that is fine.
                let _ = call.resolver.send(result);
                true
            }
            None => {
                debug!(id, "discarding response for unknown correlation id");
                false
            }
        }
    }

    /// Remove a call without resolving it (caller gave up locally).
    pub fn forget(&self, id: u64) {
        self.inner.lock().unwrap().remove(&id);
    }

    /// Fail every entry older than `timeout` with a timeout error.
    /// Returns the number of calls failed.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(u64, PendingCall)> = {
            let mut map = self.inner.lock().unwrap();
            let ids: Vec<u64> = map
                .iter()
                .filter(|(_, call)| now.duration_since(call.created) >= timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| map.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (id, call) in expired {
            debug!(id, method = %call.method, "call timed out");
            let _ = call.resolver.send(Err(ProviderError::timeout(&call.method)));
        }
        count
    }

    /// Number of in-flight calls.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallbackMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybridge_types::codes;

    #[tokio::test]
    async fn resolve_fires_exactly_once() {
        let map = CallbackMap::new();
        let rx = map.insert(1, "eth_accounts");

        assert!(map.resolve(1, Ok(serde_json::json!(["0xabc"]))));
        // Replay of the same response id is a no-op.
        assert!(!map.resolve(1, Ok(serde_json::json!(["0xother"]))));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!(["0xabc"]));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn sweep_fails_only_aged_entries() {
        let map = CallbackMap::new();
        let old_rx = map.insert(1, "eth_sendTransaction");
        let failed = map.sweep(Duration::ZERO);
        assert_eq!(failed, 1);

        let err = old_rx.await.unwrap().unwrap_err();
        assert_eq!(err.code, codes::GENERIC_FAILURE);
        assert!(err.message.contains("eth_sendTransaction"));

        // A fresh entry survives a sweep with a real window.
        let _fresh_rx = map.insert(2, "eth_accounts");
        assert_eq!(map.sweep(Duration::from_secs(60)), 0);
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn late_response_after_sweep_is_discarded() {
        let map = CallbackMap::new();
        let rx = map.insert(7, "personal_sign");
        map.sweep(Duration::ZERO);
        assert!(!map.resolve(7, Ok(serde_json::json!("0xsig"))));
        assert!(rx.await.unwrap().is_err());
    }
}
