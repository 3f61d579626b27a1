//! Inbound idempotency — seen event ids with a TTL.
//!
//! Platform webhooks retry, gateways reconnect, pollers replay. One event
//! id must produce at most one turn.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct DedupeStore {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns true if this event id was already seen inside the TTL.
    pub fn check_and_insert(&self, event_id: &str) -> bool {
        let mut map = self.seen.lock();
        let now = Instant::now();

        // Lazy cleanup when the map grows large.
        if map.len() > 10_000 {
            let ttl = self.ttl;
            map.retain(|_, ts| now.duration_since(*ts) < ttl);
        }

        if let Some(ts) = map.get(event_id) {
            if now.duration_since(*ts) < self.ttl {
                return true;
            }
        }
        map.insert(event_id.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_ttl_is_rejected() {
        let store = DedupeStore::new(Duration::from_secs(60));
        assert!(!store.check_and_insert("evt1"));
        assert!(store.check_and_insert("evt1"));
        assert!(!store.check_and_insert("evt2"));
    }

    #[test]
    fn expired_entries_are_fresh_again() {
        let store = DedupeStore::new(Duration::from_millis(0));
        assert!(!store.check_and_insert("evt1"));
        std::thread::sleep(Duration::from_millis(1));
        assert!(!store.check_and_insert("evt1"));
    }
}
