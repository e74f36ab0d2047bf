//! Message-id deduplication with a rolling window.
//!
//! Chat platforms redeliver events (retries, reconnects); each message id is
//! handled exactly once within the window.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// How many recent message ids to remember.
const WINDOW: usize = 200;

pub struct MessageDedup {
    inner: Mutex<Inner>,
}

struct Inner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDedup {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(WINDOW),
                seen: HashSet::with_capacity(WINDOW),
            }),
        }
    }

    /// Returns true if this id is new (and records it); false for replays.
    pub fn first_time(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.seen.contains(message_id) {
            return false;
        }
        if inner.order.len() >= WINDOW {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        inner.order.push_back(message_id.to_string());
        inner.seen.insert(message_id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_are_rejected() {
        let dedup = MessageDedup::new();
        assert!(dedup.first_time("m1"));
        assert!(!dedup.first_time("m1"));
        assert!(dedup.first_time("m2"));
    }

    #[test]
    fn window_evicts_oldest() {
        let dedup = MessageDedup::new();
        for i in 0..WINDOW + 1 {
            assert!(dedup.first_time(&format!("m{i}")));
        }
        // m0 was evicted and is considered new again.
        assert!(dedup.first_time("m0"));
        // A recent one is still remembered.
        assert!(!dedup.first_time(&format!("m{}", WINDOW)));
    }
}
