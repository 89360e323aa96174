//! Provider lifecycle event emitter.
//!
//! Pages register listeners for `connect`, `disconnect`, `accountsChanged`
//! and `chainChanged`. Listeners run synchronously in registration order;
//! `once` listeners are removed after their first invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`EventEmitter::on`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Thread-safe multi-listener event registry.
pub struct EventEmitter {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a persistent listener.
    pub fn on(
        &self,
        event: &str,
        listener: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(event, false, Arc::new(listener))
    }

    /// Register a listener removed after its first invocation.
    pub fn once(
        &self,
        event: &str,
        listener: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(event, true, Arc::new(listener))
    }

    fn register(&self, event: &str, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut map = self.listeners.lock().unwrap();
        if let Some(entries) = map.get_mut(event) {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            return entries.len() != before;
        }
        false
    }

    /// Invoke every listener registered for `event`.
    ///
    /// Listeners are cloned out of the registry before running, so a
    /// listener may re-register without deadlocking.
    pub fn emit(&self, event: &str, payload: &serde_json::Value) {
        let to_run: Vec<Listener> = {
            let mut map = self.listeners.lock().unwrap();
            match map.get_mut(event) {
                Some(entries) => {
                    let run: Vec<Listener> =
                        entries.iter().map(|e| e.listener.clone()).collect();
                    entries.retain(|e| !e.once);
                    run
                }
                None => return,
            }
        };
        for listener in to_run {
            listener(payload);
        }
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(event)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn on_emit_off() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = emitter.on("accountsChanged", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("accountsChanged", &serde_json::json!(["0xabc"]));
        emitter.emit("chainChanged", &serde_json::json!("0x1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(emitter.off("accountsChanged", id));
        emitter.emit("accountsChanged", &serde_json::json!([]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!emitter.off("accountsChanged", id));
    }

    #[test]
    fn once_listener_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        emitter.once("connect", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit("connect", &serde_json::json!({}));
        emitter.emit("connect", &serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count("connect"), 0);
    }
}
