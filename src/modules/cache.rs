use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Last good value per key with a validity window.
///
/// Entries are only ever overwritten; a failed refresh never clears them, so
/// `stale` keeps serving the last known value after the TTL has passed.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (V, Instant)>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// HIT iff `now - stored_at < ttl`.
    pub fn get(&self, key: &K, now: Instant) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|(_, stored_at)| now.saturating_duration_since(*stored_at) < self.ttl)
            .map(|(value, _)| value)
    }

    pub fn set(&mut self, key: K, value: V, now: Instant) {
        self.entries.insert(key, (value, now));
    }

    /// The stored value regardless of age.
    pub fn stale(&self, key: &K) -> Option<(&V, Instant)> {
        self.entries.get(key).map(|(value, at)| (value, *at))
    }
}
