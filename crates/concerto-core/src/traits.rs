//! Trait definitions at the runtime's collaborator seams.
//!
//! - `TaskDispatcher` — the one capability the workflow engine needs from
//!   the orchestrator
//! - `MemoryStore`    — durable key/value store used for journal persistence
//! - `EpisodicMemory` — log of task attempts
//! - `WorkingMemory`  — short-lived prioritized notes
//! - `KnowledgeGraph` — subject/predicate/object facts
//! - `RateLimiter`    — quota gate consulted before step execution
//!
//! The runtime never depends on a concrete implementation of any of these.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use concerto_contracts::{
    agent::TaskRequest,
    error::OrchestraResult,
    memory::{Experience, WorkingMemoryItem},
};

/// Runs one task on a named agent and returns its result.
///
/// Implemented by the orchestrator's dispatch layer; the workflow engine
/// holds it as `Arc<dyn TaskDispatcher>`, which keeps the engine free of
/// any dependency on the orchestrator itself.
pub trait TaskDispatcher: Send + Sync {
    fn execute_task(&self, agent: &str, task: &TaskRequest) -> OrchestraResult<Value>;
}

/// Namespaced key/value store with optional expiry.
pub trait MemoryStore: Send + Sync {
    /// Store `value`; returns false if the store refused the write.
    fn write(&self, namespace: &str, key: &str, value: Value, ttl: Option<Duration>) -> bool;

    /// Read a value. Expired or missing entries are `None`.
    fn read(&self, namespace: &str, key: &str) -> Option<Value>;
}

pub trait EpisodicMemory: Send + Sync {
    fn store_experience(&self, experience: &Experience) -> OrchestraResult<()>;

    fn statistics(&self) -> Value;
}

pub trait WorkingMemory: Send + Sync {
    fn add_item(&self, item: WorkingMemoryItem) -> OrchestraResult<()>;

    fn statistics(&self) -> Value;
}

pub trait KnowledgeGraph: Send + Sync {
    fn add_triple(&self, subject: &str, predicate: &str, object: &str, source: &str) -> OrchestraResult<()>;

    fn statistics(&self) -> Value;
}

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Why the request was refused. `None` when allowed.
    pub reason: Option<String>,
}

impl QuotaDecision {
    pub fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Quota gate. A refused acquisition is a recoverable condition for the caller.
pub trait RateLimiter: Send + Sync {
    fn acquire(&self, entity: &str, action: &str, cost: f64) -> QuotaDecision;
}
