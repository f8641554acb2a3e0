//! One-shot request/response rendezvous and the correlation table built on it.
//!
//! A requester registers a correlation id, gets a `Waiter`, publishes its
//! request and blocks on `Waiter::wait`. Whoever receives the matching
//! response calls `PendingResponses::resolve`, which removes the entry and
//! fulfils it. A second response for the same id finds nothing and is a no-op.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use concerto_contracts::error::{OrchestraError, OrchestraResult};

/// Create a connected single-use responder/waiter pair.
pub fn rendezvous<T>() -> (Responder<T>, Waiter<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Responder { tx }, Waiter { rx })
}

/// The sending half. Consumed on use.
pub struct Responder<T> {
    tx: SyncSender<T>,
}

impl<T> Responder<T> {
    /// Deliver the value. Returns false if the waiter has gone away.
    pub fn fulfil(self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }
}

/// The receiving half. Consumed on use.
pub struct Waiter<T> {
    rx: Receiver<T>,
}

impl<T> Waiter<T> {
    /// Block for at most `timeout`. `None` on timeout or if the responder was dropped.
    pub fn wait(self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }
}

struct PendingEntry {
    responder: Responder<Value>,
    registered_at: Instant,
}

/// Correlation id → one pending response handler.
///
/// At most one entry exists per id at any time.
#[derive(Default)]
pub struct PendingResponses {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `correlation_id`.
    ///
    /// Fails with `InvalidMessage` if one is already pending for that id.
    pub fn register(&self, correlation_id: &str) -> OrchestraResult<Waiter<Value>> {
        let mut entries = self.entries.lock().expect("pending table lock poisoned");
        if entries.contains_key(correlation_id) {
            return Err(OrchestraError::InvalidMessage {
                reason: format!("correlation id '{}' already has a pending handler", correlation_id),
            });
        }
        let (responder, waiter) = rendezvous();
        entries.insert(
            correlation_id.to_string(),
            PendingEntry { responder, registered_at: Instant::now() },
        );
        Ok(waiter)
    }

    /// Remove the handler for `correlation_id` and hand it `value`.
    ///
    /// Returns false when no handler was pending (a late or duplicate response).
    pub fn resolve(&self, correlation_id: &str, value: Value) -> bool {
        let entry = self
            .entries
            .lock()
            .expect("pending table lock poisoned")
            .remove(correlation_id);
        match entry {
            Some(entry) => {
                if !entry.responder.fulfil(value) {
                    debug!(correlation_id = %correlation_id, "response arrived after requester gave up");
                }
                true
            }
            None => false,
        }
    }

    /// Drop the handler without resolving it. Returns true if one was pending.
    pub fn discard(&self, correlation_id: &str) -> bool {
        self.entries
            .lock()
            .expect("pending table lock poisoned")
            .remove(correlation_id)
            .is_some()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries
            .lock()
            .expect("pending table lock poisoned")
            .contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry registered more than `max_age` ago. Returns how many.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().expect("pending table lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.registered_at.elapsed() <= max_age);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("pending table lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use concerto_contracts::error::OrchestraError;

    use super::{rendezvous, PendingResponses};

    #[test]
    fn waiter_receives_value_from_other_thread() {
        let (responder, waiter) = rendezvous();
        thread::spawn(move || {
            responder.fulfil(5);
        });
        assert_eq!(waiter.wait(Duration::from_secs(5)), Some(5));
    }

    #[test]
    fn waiter_times_out_without_value() {
        let (_responder, waiter) = rendezvous::<u8>();
        assert_eq!(waiter.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn only_one_handler_per_correlation_id() {
        let pending = PendingResponses::new();
        let _waiter = pending.register("c-1").unwrap();

        match pending.register("c-1") {
            Err(OrchestraError::InvalidMessage { reason }) => assert!(reason.contains("c-1")),
            Err(other) => panic!("expected InvalidMessage, got {:?}", other),
            Ok(_) => panic!("second registration must fail"),
        }
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn late_duplicate_response_is_a_no_op() {
        let pending = Arc::new(PendingResponses::new());
        let waiter = pending.register("c-2").unwrap();

        assert!(pending.resolve("c-2", json!({ "n": 1 })));
        assert!(!pending.resolve("c-2", json!({ "n": 2 })));
        assert_eq!(waiter.wait(Duration::from_secs(1)), Some(json!({ "n": 1 })));
        assert!(pending.is_empty());
    }

    #[test]
    fn resolve_after_requester_timed_out_still_removes_entry() {
        let pending = PendingResponses::new();
        let waiter = pending.register("c-3").unwrap();
        assert_eq!(waiter.wait(Duration::from_millis(5)), None);

        assert!(pending.resolve("c-3", json!(null)));
        assert!(!pending.contains("c-3"));
    }

    #[test]
    fn purge_drops_only_old_entries() {
        let pending = PendingResponses::new();
        let _old = pending.register("old").unwrap();
        thread::sleep(Duration::from_millis(30));
        let _new = pending.register("new").unwrap();

        assert_eq!(pending.purge_older_than(Duration::from_millis(15)), 1);
        assert!(pending.contains("new"));
        assert!(!pending.contains("old"));
    }
}
