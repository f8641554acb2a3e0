//! # concerto-safety
//!
//! Exactly-once step execution for workflows.
//!
//! ## Overview
//!
//! An [`IdempotencyGuard`] belongs to one workflow run. Every step executed
//! through it is addressed by a dedupe key (by default the SHA-256 of its
//! canonical JSON inputs). The first execution of a key runs the step body
//! and appends a record to an append-only journal; every later execution of
//! the same key is a replay that returns the recorded outputs untouched.
//!
//! ## Journal integrity
//!
//! Journal records form a SHA-256 hash chain. Each record stores the hash of
//! its predecessor in `prev_hash` and its own hash in `this_hash`; the first
//! record's `prev_hash` is [`GENESIS_HASH`]. [`IdempotencyGuard::verify_integrity`]
//! recomputes the chain.
//!
//! ## Outbox
//!
//! Before a body runs, the guard claims it in the outbox under a fresh job
//! token. The entry is cleared once the record is safely persisted, so a
//! non-empty outbox lists work that may need recovery.

pub mod chain;
pub mod guard;

pub use chain::{content_address, hash_record, verify_chain, GENESIS_HASH};
pub use guard::{journal_namespace, IdempotencyGuard, SafetyRegistry, STEP_EXEC_ACTION};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use concerto_contracts::error::OrchestraError;
    use concerto_contracts::journal::JournalStatus;
    use concerto_core::traits::{MemoryStore, QuotaDecision, RateLimiter};

    use super::*;

    // ── Mock collaborators ────────────────────────────────────────────────────

    /// A store that can be told to refuse writes.
    #[derive(Default)]
    struct MockStore {
        data: Mutex<HashMap<(String, String), Value>>,
        refuse_writes: AtomicBool,
    }

    impl MemoryStore for MockStore {
        fn write(&self, namespace: &str, key: &str, value: Value, _ttl: Option<Duration>) -> bool {
            if self.refuse_writes.load(Ordering::SeqCst) {
                return false;
            }
            self.data
                .lock()
                .unwrap()
                .insert((namespace.to_string(), key.to_string()), value);
            true
        }

        fn read(&self, namespace: &str, key: &str) -> Option<Value> {
            self.data
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), key.to_string()))
                .cloned()
        }
    }

    /// Records every acquisition; denies when `deny` is set.
    #[derive(Default)]
    struct MockLimiter {
        calls: Mutex<Vec<(String, String, f64)>>,
        deny: AtomicBool,
    }

    impl RateLimiter for MockLimiter {
        fn acquire(&self, entity: &str, action: &str, cost: f64) -> QuotaDecision {
            self.calls
                .lock()
                .unwrap()
                .push((entity.to_string(), action.to_string(), cost));
            if self.deny.load(Ordering::SeqCst) {
                QuotaDecision::deny("over budget")
            } else {
                QuotaDecision::allow()
            }
        }
    }

    fn frozen(workflow_id: &str) -> IdempotencyGuard {
        IdempotencyGuard::new(workflow_id).with_frozen(42, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    // ── 1. idempotence ────────────────────────────────────────────────────────

    #[test]
    fn second_execution_of_same_inputs_is_a_replay() {
        let guard = frozen("wf-1");
        let runs = AtomicUsize::new(0);
        let body = |_: &Value| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "result": 7 }))
        };

        let first = guard.execute_step("s1", &json!({ "x": 1 }), None, body).unwrap();
        let second = guard
            .execute_step("s1", &json!({ "x": 1 }), None, |_| -> Result<Value, OrchestraError> {
                panic!("replay must not run the body")
            })
            .unwrap();

        assert_eq!(first, (false, json!({ "result": 7 })));
        assert_eq!(second, (true, json!({ "result": 7 })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(guard.journal_len(), 1);
        assert!(guard.get_outbox().is_empty());
    }

    #[test]
    fn key_order_does_not_change_the_dedupe_key() {
        let a = content_address(&json!({ "a": 1, "b": 2 }));
        let b = content_address(&json!({ "b": 2, "a": 1 }));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_address(&json!({ "a": 1, "b": 3 })));
    }

    #[test]
    fn explicit_dedupe_key_overrides_content_hash() {
        let guard = frozen("wf-1");
        guard
            .execute_step("s1", &json!({ "x": 1 }), Some("order-9"), |_| Ok(json!("first")))
            .unwrap();
        let (replay, outputs) = guard
            .execute_step("s1", &json!({ "x": 2 }), Some("order-9"), |_| Ok(json!("second")))
            .unwrap();
        assert!(replay);
        assert_eq!(outputs, json!("first"));
    }

    // ── 2. deterministic inputs ───────────────────────────────────────────────

    #[test]
    fn body_sees_frozen_seed_and_clock() {
        let guard = frozen("wf-1");
        let (_, outputs) = guard
            .execute_step("s1", &json!({ "x": 1 }), None, |inputs| Ok(inputs.clone()))
            .unwrap();
        assert_eq!(outputs["x"], 1);
        assert_eq!(outputs["__seed"], 42);
        assert_eq!(outputs["__clock"], "2024-01-01T00:00:00+00:00");

        // The journal keeps the caller's inputs, not the augmented ones.
        let journal = guard.replay_journal(None);
        assert!(journal[0].inputs.get("__seed").is_none());
        assert_eq!(guard.seed(), 42);
    }

    // ── 3. failures ───────────────────────────────────────────────────────────

    #[test]
    fn failing_body_records_nothing() {
        let guard = frozen("wf-1");
        let result = guard.execute_step("s1", &json!({}), None, |_| {
            Err(OrchestraError::HandlerFailed { reason: "boom".to_string() })
        });
        match result {
            Err(OrchestraError::HandlerFailed { reason }) => assert_eq!(reason, "boom"),
            other => panic!("expected HandlerFailed, got {:?}", other),
        }
        assert_eq!(guard.journal_len(), 0);
        assert!(guard.get_outbox().is_empty());

        // A retry runs the body again.
        let (replay, _) = guard.execute_step("s1", &json!({}), None, |_| Ok(json!(1))).unwrap();
        assert!(!replay);
    }

    #[test]
    fn quota_denial_records_nothing() {
        let limiter = Arc::new(MockLimiter::default());
        limiter.deny.store(true, Ordering::SeqCst);
        let guard = frozen("wf-q").with_rate_limiter(limiter.clone());

        match guard.execute_step("s1", &json!({ "k": "v" }), None, |_| Ok(json!(1))) {
            Err(OrchestraError::QuotaExceeded { entity, reason }) => {
                assert_eq!(entity, "wf-q");
                assert_eq!(reason, "over budget");
            }
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
        assert_eq!(guard.journal_len(), 0);
        assert!(guard.get_outbox().is_empty());

        let calls = limiter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, STEP_EXEC_ACTION);
        assert_eq!(calls[0].2, r#"{"k":"v"}"#.len() as f64);
    }

    #[test]
    fn replays_do_not_consume_quota() {
        let limiter = Arc::new(MockLimiter::default());
        let guard = frozen("wf-q").with_rate_limiter(limiter.clone());
        guard.execute_step("s1", &json!(1), None, |_| Ok(json!(1))).unwrap();
        guard.execute_step("s1", &json!(1), None, |_| Ok(json!(1))).unwrap();
        assert_eq!(limiter.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_persist_keeps_outbox_entry() {
        let store = Arc::new(MockStore::default());
        store.refuse_writes.store(true, Ordering::SeqCst);
        let guard = frozen("wf-p").with_store(store);

        match guard.execute_step("s1", &json!({ "n": 1 }), None, |_| Ok(json!("done"))) {
            Err(OrchestraError::JournalWriteFailed { reason }) => assert!(reason.contains("s1")),
            other => panic!("expected JournalWriteFailed, got {:?}", other),
        }
        let outbox = guard.get_outbox();
        assert_eq!(outbox.len(), 1);
        let entry = outbox.values().next().unwrap();
        assert_eq!(entry.step_id, "s1");
        assert_eq!(entry.dedupe_key, content_address(&json!({ "n": 1 })));
    }

    // ── 4. durable replay ─────────────────────────────────────────────────────

    #[test]
    fn persisted_record_replays_in_a_fresh_guard() {
        let store = Arc::new(MockStore::default());
        let first = frozen("wf-d").with_store(store.clone());
        first
            .execute_step("s1", &json!({ "n": 1 }), None, |_| Ok(json!({ "v": 1 })))
            .unwrap();

        // Same workflow id, new process: only the store survives.
        let second = frozen("wf-d").with_store(store.clone());
        let (replay, outputs) = second
            .execute_step("s1", &json!({ "n": 1 }), None, |_| Ok(json!({ "v": 2 })))
            .unwrap();

        assert!(replay);
        assert_eq!(outputs, json!({ "v": 1 }));
        let journal = second.replay_journal(None);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].status, JournalStatus::Replayed);
        assert!(second.verify_integrity());

        let key = content_address(&json!({ "n": 1 }));
        assert!(store.read(&journal_namespace("wf-d"), &key).is_some());
    }

    // ── 5. journal chain ──────────────────────────────────────────────────────

    #[test]
    fn journal_chain_verifies_and_detects_tampering() {
        let guard = frozen("wf-c");
        for n in 0..3 {
            guard
                .execute_step(&format!("s{}", n), &json!({ "n": n }), None, |_| Ok(json!(n)))
                .unwrap();
        }
        assert!(guard.verify_integrity());

        let mut journal = guard.replay_journal(None);
        assert_eq!(journal[0].prev_hash, GENESIS_HASH);
        assert_eq!(journal[1].prev_hash, journal[0].this_hash);
        assert!(verify_chain("wf-c", &journal));

        journal[1].outputs = json!("forged");
        assert!(!verify_chain("wf-c", &journal));
        assert!(!verify_chain("other-workflow", &guard.replay_journal(None)));
    }

    #[test]
    fn replay_journal_from_index() {
        let guard = frozen("wf-r");
        for n in 0..4 {
            guard.execute_step("s", &json!(n), None, |_| Ok(json!(n))).unwrap();
        }
        assert_eq!(guard.replay_journal(Some(2)).len(), 2);
        assert_eq!(guard.replay_journal(Some(2))[0].outputs, json!(2));
        assert!(guard.replay_journal(Some(99)).is_empty());
    }

    // ── 6. registry ───────────────────────────────────────────────────────────

    #[test]
    fn registry_returns_one_guard_per_workflow() {
        let registry = SafetyRegistry::new(Some(Arc::new(MockStore::default())), None);
        let a = registry.guard("wf-a");
        let again = registry.guard("wf-a");
        assert!(Arc::ptr_eq(&a, &again));
        registry.guard("wf-b");
        assert_eq!(registry.workflow_ids(), vec!["wf-a", "wf-b"]);

        assert!(registry.remove("wf-a").is_some());
        assert!(registry.get("wf-a").is_none());
    }
}
