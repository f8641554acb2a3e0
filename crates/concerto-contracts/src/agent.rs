//! Agent registry records, task requests, and collaboration sessions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::capability::CapabilitySet;

/// Lifecycle status of a registered agent.
///
/// Only task dispatch moves an agent between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the registry knows about one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique registry key.
    pub name: String,
    pub role: String,
    pub capabilities: CapabilitySet,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    pub metadata: Value,
}

impl AgentRecord {
    pub fn new(name: impl Into<String>, role: impl Into<String>, capabilities: CapabilitySet, metadata: Value) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            capabilities,
            status: AgentStatus::Idle,
            last_seen: Utc::now(),
            metadata,
        }
    }
}

/// The unit of work the workflow engine hands to the dispatcher.
///
/// Serialized as `{action, parameters, context}` inside a `task_request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub action: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TaskRequest {
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// The action name, or `"unknown"` when none was given.
    pub fn action_name(&self) -> &str {
        self.action.as_deref().unwrap_or("unknown")
    }

    pub fn to_value(&self) -> Value {
        json!({
            "action": self.action,
            "parameters": self.parameters,
            "context": self.context,
        })
    }
}

/// Lifecycle status of a collaboration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStatus {
    Active,
    Completed,
    Failed,
}

impl CollaborationStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            CollaborationStatus::Active => false,
            CollaborationStatus::Completed | CollaborationStatus::Failed => true,
        }
    }
}

/// One participant's contribution to a collaboration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

/// A multi-agent collaboration started by `start_collaboration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: String,
    pub initiator: String,
    /// Ordered, no duplicates. The initiator is always first.
    pub participants: Vec<String>,
    pub collaboration_type: String,
    pub shared_context: Map<String, Value>,
    pub status: CollaborationStatus,
    pub results: BTreeMap<String, ParticipantResult>,
    pub started_at: DateTime<Utc>,
}

impl CollaborationSession {
    pub fn new(
        id: impl Into<String>,
        initiator: impl Into<String>,
        participants: &[String],
        collaboration_type: impl Into<String>,
        shared_context: Map<String, Value>,
    ) -> Self {
        let initiator = initiator.into();
        let mut session = Self {
            id: id.into(),
            initiator: initiator.clone(),
            participants: Vec::with_capacity(participants.len() + 1),
            collaboration_type: collaboration_type.into(),
            shared_context,
            status: CollaborationStatus::Active,
            results: BTreeMap::new(),
            started_at: Utc::now(),
        };
        session.add_participant(initiator);
        for participant in participants {
            session.add_participant(participant.clone());
        }
        session
    }

    /// Append a participant unless already present.
    pub fn add_participant(&mut self, agent: impl Into<String>) {
        let agent = agent.into();
        if !self.participants.contains(&agent) {
            self.participants.push(agent);
        }
    }

    /// Record (or overwrite) one participant's result. Ignored once terminal.
    pub fn record_result(&mut self, agent: impl Into<String>, result: Value) {
        if self.status.is_terminal() {
            return;
        }
        self.results.insert(
            agent.into(),
            ParticipantResult { result, timestamp: Utc::now() },
        );
    }

    /// Returns false if the session was already terminal.
    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = CollaborationStatus::Completed;
        true
    }

    /// Returns false if the session was already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = CollaborationStatus::Failed;
        self.shared_context
            .insert("failure_reason".to_string(), Value::String(reason.into()));
        true
    }

    pub fn summary(&self) -> CollaborationSummary {
        let duration = Utc::now().signed_duration_since(self.started_at);
        CollaborationSummary {
            collaboration_id: self.id.clone(),
            initiator: self.initiator.clone(),
            participants: self.participants.clone(),
            collaboration_type: self.collaboration_type.clone(),
            status: self.status,
            duration_ms: duration.num_milliseconds().max(0) as u64,
            results_count: self.results.len(),
            shared_context: self.shared_context.clone(),
        }
    }
}

/// Read-only view of a collaboration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSummary {
    pub collaboration_id: String,
    pub initiator: String,
    pub participants: Vec<String>,
    pub collaboration_type: String,
    pub status: CollaborationStatus,
    pub duration_ms: u64,
    pub results_count: usize,
    pub shared_context: Map<String, Value>,
}

/// Aggregate orchestrator counters plus a registry snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub active_collaborations: u64,
    pub total_collaborations: u64,
    pub registered_agents: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
}

/// Statistics reported by the memory collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub episodic: Value,
    pub semantic: Value,
    pub working: Value,
}
