//! Replay-journal and outbox records for idempotent step execution.
//!
//! `StepExecutionRecord` is what the idempotency guard appends to its journal,
//! one per distinct dedupe key. `OutboxEntry` marks a step that started but
//! has not yet been confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a journal record came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    /// The step body ran in this process and succeeded.
    Success,
    /// The record was recovered from the durable store rather than executed here.
    Replayed,
}

/// An immutable entry in the replay journal.
///
/// Each record commits to its predecessor via `prev_hash`, so the journal
/// forms a SHA-256 hash chain that can be checked for tampering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    pub step_id: String,
    /// Content hash of `inputs` unless the caller supplied one.
    pub dedupe_key: String,
    pub inputs: Value,
    pub outputs: Value,
    pub executed_at: DateTime<Utc>,
    pub status: JournalStatus,
    /// Outbox token the execution ran under.
    pub job_token: String,
    /// Position in the journal, starting at 0.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub this_hash: String,
}

/// A step that has been claimed but not yet confirmed in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub step_id: String,
    pub dedupe_key: String,
    pub inputs: Value,
    pub job_token: String,
    pub registered_at: DateTime<Utc>,
}
