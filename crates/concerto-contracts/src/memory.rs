//! Records the orchestrator hands to its memory collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One task attempt, stored in episodic memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    /// Short description, e.g. `"summarize on writer"`.
    pub task: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
    pub lessons_learned: Vec<String>,
    pub performance_metrics: Map<String, Value>,
    pub agent_name: String,
    pub task_type: String,
}

/// Priority tag for working-memory items. Ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A short-lived note placed in working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryItem {
    pub data: Value,
    pub priority: MemoryItemPriority,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkingMemoryItem {
    pub fn new(data: Value, priority: MemoryItemPriority, tags: Vec<String>) -> Self {
        Self {
            data,
            priority,
            tags,
            created_at: Utc::now(),
        }
    }
}
