//! Bounded queue for requests issued before the relay is ready.
//!
//! Until the readiness handshake completes, outbound envelopes are parked
//! here instead of being sent. The queue drops the oldest entry on
//! overflow; the correlation sweep eventually fails the dropped caller.

use std::collections::VecDeque;

use tracing::warn;

use keybridge_messages::Envelope;

pub struct OutboundQueue {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue an envelope, evicting the oldest entry when full.
    /// Returns the evicted envelope, if any.
    pub fn push(&mut self, envelope: Envelope) -> Option<Envelope> {
        let evicted = if self.entries.len() >= self.capacity {
            let dropped = self.entries.pop_front();
            if let Some(d) = &dropped {
                warn!(
                    request_id = d.request_id(),
                    "outbound queue full, dropping oldest request"
                );
            }
            dropped
        } else {
            None
        };
        self.entries.push_back(envelope);
        evicted
    }

    /// Drain every queued envelope, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: u64) -> Envelope {
        Envelope::readiness_check(id)
    }

    #[test]
    fn drops_oldest_on_overflow() {
        let mut q = OutboundQueue::new(2);
        assert!(q.push(check(1)).is_none());
        assert!(q.push(check(2)).is_none());
        let evicted = q.push(check(3)).expect("oldest evicted");
        assert_eq!(evicted.request_id(), 1);

        let drained = q.drain();
        assert_eq!(
            drained.iter().map(|e| e.request_id()).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(q.is_empty());
    }
}
