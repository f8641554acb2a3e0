//! Namespaced key/value store with optional per-entry expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use concerto_core::traits::MemoryStore;

struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// `MemoryStore` backed by a `HashMap`. Expired entries read as absent and
/// are purged when touched.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<(String, String), StoredValue>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys in `namespace`, sorted.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("memory store lock poisoned");
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|((ns, _), stored)| ns == namespace && !stored.is_expired(now))
            .map(|((_, key), _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        let before = entries.len();
        entries.retain(|_, stored| !stored.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryStore for InMemoryStore {
    fn write(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert((namespace.to_string(), key.to_string()), StoredValue { value, expires_at });
        debug!(namespace = %namespace, key = %key, "memory store write");
        true
    }

    fn read(&self, namespace: &str, key: &str) -> Option<Value> {
        let id = (namespace.to_string(), key.to_string());
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        match entries.get(&id) {
            Some(stored) if stored.is_expired(Instant::now()) => {
                entries.remove(&id);
                None
            }
            Some(stored) => Some(stored.value.clone()),
            None => None,
        }
    }
}
