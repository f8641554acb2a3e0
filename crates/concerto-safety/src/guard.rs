//! Per-workflow idempotency guard.
//!
//! `execute_step` runs a step body at most once per dedupe key:
//!
//! 1. Look the key up in the in-memory journal, then in the durable store.
//!    A hit returns the recorded outputs as a replay without running anything.
//! 2. Ask the rate limiter for `step_exec` quota. A denial records nothing.
//! 3. Register an outbox entry under a fresh job token.
//! 4. Run the body with `__seed` and `__clock` injected into its inputs.
//! 5. Append the journal record, persist it, clear the outbox entry.
//!
//! A body that fails clears its outbox entry and records nothing. A failed
//! persist leaves the outbox entry behind for recovery.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use concerto_contracts::{
    error::{OrchestraError, OrchestraResult},
    journal::{JournalStatus, OutboxEntry, StepExecutionRecord},
};
use concerto_core::traits::{MemoryStore, RateLimiter};

use crate::chain::{content_address, hash_record, verify_chain, GENESIS_HASH};

/// Action name presented to the rate limiter for every executed step.
pub const STEP_EXEC_ACTION: &str = "step_exec";

/// Store namespace holding a workflow's persisted journal.
pub fn journal_namespace(workflow_id: &str) -> String {
    format!("workflow_{}_journal", workflow_id)
}

// ── Internal mutable state ────────────────────────────────────────────────────

struct GuardState {
    journal: Vec<StepExecutionRecord>,
    last_hash: String,
    /// Job token → claimed step.
    outbox: BTreeMap<String, OutboxEntry>,
}

impl GuardState {
    fn find(&self, dedupe_key: &str) -> Option<&StepExecutionRecord> {
        self.journal.iter().find(|r| r.dedupe_key == dedupe_key)
    }

    /// Chain `record` onto the journal and return the stored copy.
    fn append(&mut self, workflow_id: &str, mut record: StepExecutionRecord) -> StepExecutionRecord {
        record.sequence = self.journal.len() as u64;
        record.prev_hash = self.last_hash.clone();
        record.this_hash = hash_record(workflow_id, record.sequence, &record, &record.prev_hash);
        self.last_hash = record.this_hash.clone();
        self.journal.push(record.clone());
        record
    }
}

// ── Guard ─────────────────────────────────────────────────────────────────────

pub struct IdempotencyGuard {
    workflow_id: String,
    seed: u64,
    clock: DateTime<Utc>,
    store: Option<Arc<dyn MemoryStore>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    state: Mutex<GuardState>,
    /// Serializes `execute_step` so a key can never run twice concurrently.
    execution: Mutex<()>,
}

impl IdempotencyGuard {
    /// A guard whose seed and clock are frozen at the current time.
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            seed: now.timestamp().max(0) as u64,
            clock: now,
            store: None,
            limiter: None,
            state: Mutex::new(GuardState {
                journal: Vec::new(),
                last_hash: GENESIS_HASH.to_string(),
                outbox: BTreeMap::new(),
            }),
            execution: Mutex::new(()),
        }
    }

    /// Replace the frozen seed and clock.
    pub fn with_frozen(mut self, seed: u64, clock: DateTime<Utc>) -> Self {
        self.seed = seed;
        self.clock = clock;
        self
    }

    /// Persist journal records to, and recover them from, `store`.
    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Consult `limiter` before every non-replayed step.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Run `body` unless `dedupe_key` (default: content hash of `inputs`) has
    /// already been executed. Returns `(is_replay, outputs)`.
    ///
    /// `body` must not call back into this guard.
    pub fn execute_step<F>(
        &self,
        step_id: &str,
        inputs: &Value,
        dedupe_key: Option<&str>,
        body: F,
    ) -> OrchestraResult<(bool, Value)>
    where
        F: FnOnce(&Value) -> OrchestraResult<Value>,
    {
        let _serial = self
            .execution
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let dedupe_key = match dedupe_key {
            Some(key) => key.to_string(),
            None => content_address(inputs),
        };

        if let Some(outputs) = self.lookup(&dedupe_key) {
            debug!(workflow_id = %self.workflow_id, step = %step_id, dedupe_key = %dedupe_key, "step replayed");
            return Ok((true, outputs));
        }

        if let Some(limiter) = &self.limiter {
            let cost = serde_json::to_string(inputs).map(|s| s.len()).unwrap_or(0) as f64;
            let decision = limiter.acquire(&self.workflow_id, STEP_EXEC_ACTION, cost);
            if !decision.allowed {
                let reason = decision.reason.unwrap_or_else(|| "quota denied".to_string());
                warn!(workflow_id = %self.workflow_id, step = %step_id, reason = %reason, "step refused by quota");
                return Err(OrchestraError::QuotaExceeded {
                    entity: self.workflow_id.clone(),
                    reason,
                });
            }
        }

        let job_token = uuid::Uuid::new_v4().to_string();
        self.lock_state().outbox.insert(
            job_token.clone(),
            OutboxEntry {
                step_id: step_id.to_string(),
                dedupe_key: dedupe_key.clone(),
                inputs: inputs.clone(),
                job_token: job_token.clone(),
                registered_at: Utc::now(),
            },
        );

        let outputs = match body(&self.deterministic_inputs(inputs)) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.lock_state().outbox.remove(&job_token);
                warn!(workflow_id = %self.workflow_id, step = %step_id, error = %e, "step body failed");
                return Err(e);
            }
        };

        let record = self.lock_state().append(
            &self.workflow_id,
            StepExecutionRecord {
                step_id: step_id.to_string(),
                dedupe_key: dedupe_key.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                executed_at: Utc::now(),
                status: JournalStatus::Success,
                job_token: job_token.clone(),
                sequence: 0,
                prev_hash: String::new(),
                this_hash: String::new(),
            },
        );
        info!(
            workflow_id = %self.workflow_id,
            step = %step_id,
            sequence = record.sequence,
            "journal record appended"
        );

        self.persist(&record)?;
        self.lock_state().outbox.remove(&job_token);
        Ok((false, outputs))
    }

    /// Journal records from index `from` (default 0) onwards.
    pub fn replay_journal(&self, from: Option<usize>) -> Vec<StepExecutionRecord> {
        let state = self.lock_state();
        let start = from.unwrap_or(0).min(state.journal.len());
        state.journal[start..].to_vec()
    }

    /// Claimed steps not yet confirmed, keyed by job token.
    pub fn get_outbox(&self) -> BTreeMap<String, OutboxEntry> {
        self.lock_state().outbox.clone()
    }

    pub fn journal_len(&self) -> usize {
        self.lock_state().journal.len()
    }

    /// True when the in-memory journal's hash chain is intact.
    pub fn verify_integrity(&self) -> bool {
        verify_chain(&self.workflow_id, &self.lock_state().journal)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().expect("idempotency guard state lock poisoned")
    }

    /// Outputs already recorded for `dedupe_key`, consulting the store second.
    fn lookup(&self, dedupe_key: &str) -> Option<Value> {
        if let Some(record) = self.lock_state().find(dedupe_key) {
            return Some(record.outputs.clone());
        }

        let store = self.store.as_ref()?;
        let persisted = store.read(&journal_namespace(&self.workflow_id), dedupe_key)?;
        let record: StepExecutionRecord = match serde_json::from_value(persisted) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    dedupe_key = %dedupe_key,
                    error = %e,
                    "ignoring unreadable persisted journal record"
                );
                return None;
            }
        };

        let recovered = self.lock_state().append(
            &self.workflow_id,
            StepExecutionRecord {
                status: JournalStatus::Replayed,
                ..record
            },
        );
        info!(
            workflow_id = %self.workflow_id,
            step = %recovered.step_id,
            "journal record recovered from store"
        );
        Some(recovered.outputs)
    }

    fn deterministic_inputs(&self, inputs: &Value) -> Value {
        let mut augmented = match inputs {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        augmented.insert("__seed".to_string(), json!(self.seed));
        augmented.insert("__clock".to_string(), json!(self.clock.to_rfc3339()));
        Value::Object(augmented)
    }

    fn persist(&self, record: &StepExecutionRecord) -> OrchestraResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let value = serde_json::to_value(record).map_err(|e| OrchestraError::JournalWriteFailed {
            reason: format!("journal record not serializable: {}", e),
        })?;
        if store.write(&journal_namespace(&self.workflow_id), &record.dedupe_key, value, None) {
            Ok(())
        } else {
            warn!(
                workflow_id = %self.workflow_id,
                step = %record.step_id,
                job_token = %record.job_token,
                "journal persist failed; outbox entry kept for recovery"
            );
            Err(OrchestraError::JournalWriteFailed {
                reason: format!(
                    "store refused journal record for step '{}' (job token {})",
                    record.step_id, record.job_token
                ),
            })
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Workflow id → its guard. Guards share the registry's store and limiter.
#[derive(Default)]
pub struct SafetyRegistry {
    store: Option<Arc<dyn MemoryStore>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    guards: Mutex<BTreeMap<String, Arc<IdempotencyGuard>>>,
}

impl SafetyRegistry {
    pub fn new(store: Option<Arc<dyn MemoryStore>>, limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        Self {
            store,
            limiter,
            guards: Mutex::new(BTreeMap::new()),
        }
    }

    /// The guard for `workflow_id`, created on first use.
    pub fn guard(&self, workflow_id: &str) -> Arc<IdempotencyGuard> {
        let mut guards = self.guards.lock().expect("safety registry lock poisoned");
        let guard = guards.entry(workflow_id.to_string()).or_insert_with(|| {
            let mut guard = IdempotencyGuard::new(workflow_id);
            if let Some(store) = &self.store {
                guard = guard.with_store(Arc::clone(store));
            }
            if let Some(limiter) = &self.limiter {
                guard = guard.with_rate_limiter(Arc::clone(limiter));
            }
            Arc::new(guard)
        });
        Arc::clone(guard)
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<IdempotencyGuard>> {
        self.guards
            .lock()
            .expect("safety registry lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    pub fn remove(&self, workflow_id: &str) -> Option<Arc<IdempotencyGuard>> {
        self.guards
            .lock()
            .expect("safety registry lock poisoned")
            .remove(workflow_id)
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.guards
            .lock()
            .expect("safety registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
