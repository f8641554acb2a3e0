//! Hash-chain primitives for the replay journal.
//!
//! Hash input layout (bytes, in order):
//!   1. workflow_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of the record body (every field except the three
//!      chain fields themselves)
//!
//! Canonical JSON here is `serde_json` output over `Value`s whose objects are
//! key-sorted maps, so equal content always produces equal bytes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use concerto_contracts::journal::{JournalStatus, StepExecutionRecord};

/// `prev_hash` of the first record in every journal.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize)]
struct RecordBody<'a> {
    step_id: &'a str,
    dedupe_key: &'a str,
    inputs: &'a Value,
    outputs: &'a Value,
    executed_at: &'a DateTime<Utc>,
    status: JournalStatus,
    job_token: &'a str,
}

impl<'a> From<&'a StepExecutionRecord> for RecordBody<'a> {
    fn from(record: &'a StepExecutionRecord) -> Self {
        Self {
            step_id: &record.step_id,
            dedupe_key: &record.dedupe_key,
            inputs: &record.inputs,
            outputs: &record.outputs,
            executed_at: &record.executed_at,
            status: record.status,
            job_token: &record.job_token,
        }
    }
}

/// SHA-256 hex of the canonical JSON of `value`.
///
/// Used as the default dedupe key: identical inputs always address the same
/// journal record.
pub fn content_address(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).expect("a JSON value is always serializable");
    hex::encode(Sha256::digest(&bytes))
}

/// Compute `this_hash` for `record` at position `sequence` after `prev_hash`.
///
/// The record's own `sequence`, `prev_hash` and `this_hash` fields are ignored.
pub fn hash_record(workflow_id: &str, sequence: u64, record: &StepExecutionRecord, prev_hash: &str) -> String {
    let body_json = serde_json::to_vec(&RecordBody::from(record))
        .expect("journal record body must always be serializable to JSON");

    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&body_json);

    hex::encode(hasher.finalize())
}

/// Verify a journal's hash chain.
///
/// Valid when every record's `sequence` is its index, its `prev_hash` is the
/// previous record's `this_hash` (or `GENESIS_HASH` first), and its
/// `this_hash` recomputes. An empty journal is valid.
pub fn verify_chain(workflow_id: &str, records: &[StepExecutionRecord]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();

    for (index, record) in records.iter().enumerate() {
        if record.sequence != index as u64 || record.prev_hash != expected_prev {
            return false;
        }
        let recomputed = hash_record(workflow_id, record.sequence, record, &record.prev_hash);
        if record.this_hash != recomputed {
            return false;
        }
        expected_prev = record.this_hash.clone();
    }

    true
}
