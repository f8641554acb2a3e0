//! Task dispatch onto registered agents.
//!
//! `AgentDispatch` is the capability the workflow engine runs tasks through.
//! It owns the task counters and reports every attempt to the memory
//! collaborators:
//!
//! - episodic memory gets an `Experience` with the duration in
//!   `performance_metrics.execution_time`
//! - working memory gets a note tagged `[task, success|error, <agent>]`,
//!   `Medium` priority on success and `High` on failure
//!
//! Memory failures are logged and never fail the task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use concerto_contracts::{
    agent::TaskRequest,
    error::{OrchestraError, OrchestraResult},
    memory::{Experience, MemoryItemPriority, WorkingMemoryItem},
};
use concerto_core::traits::{EpisodicMemory, KnowledgeGraph, TaskDispatcher, WorkingMemory};

use crate::registry::AgentRegistry;

/// The memory collaborators an orchestrator reports to. Each one is optional.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub episodic: Option<Arc<dyn EpisodicMemory>>,
    pub working: Option<Arc<dyn WorkingMemory>>,
    pub knowledge: Option<Arc<dyn KnowledgeGraph>>,
}

impl Collaborators {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_episodic(mut self, memory: Arc<dyn EpisodicMemory>) -> Self {
        self.episodic = Some(memory);
        self
    }

    pub fn with_working(mut self, memory: Arc<dyn WorkingMemory>) -> Self {
        self.working = Some(memory);
        self
    }

    pub fn with_knowledge(mut self, graph: Arc<dyn KnowledgeGraph>) -> Self {
        self.knowledge = Some(graph);
        self
    }
}

/// Task counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

pub struct AgentDispatch {
    registry: Arc<AgentRegistry>,
    collaborators: Collaborators,
    counters: Counters,
}

impl AgentDispatch {
    pub fn new(registry: Arc<AgentRegistry>, collaborators: Collaborators) -> Self {
        Self {
            registry,
            collaborators,
            counters: Counters::default(),
        }
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            total: self.counters.total.load(Ordering::Relaxed),
            successful: self.counters.successful.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, agent: &str, task: &TaskRequest, outcome: &OrchestraResult<Value>, execution_time: f64) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => self.counters.successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.counters.failed.fetch_add(1, Ordering::Relaxed),
        };

        let action = task.action_name();
        let mut metrics = Map::new();
        metrics.insert("execution_time".to_string(), json!(execution_time));

        if let Some(episodic) = &self.collaborators.episodic {
            let (context, lessons_learned) = match outcome {
                Ok(_) => (json!({ "agent": agent, "task": task.to_value() }), Vec::new()),
                Err(e) => (
                    json!({ "agent": agent, "task": task.to_value(), "error": e.to_string() }),
                    vec![format!("Task failed: {}", e)],
                ),
            };
            let experience = Experience {
                task: format!("{} on {}", action, agent),
                success: outcome.is_ok(),
                timestamp: Utc::now(),
                context,
                lessons_learned,
                performance_metrics: metrics,
                agent_name: agent.to_string(),
                task_type: action.to_string(),
            };
            if let Err(e) = episodic.store_experience(&experience) {
                warn!(agent = %agent, error = %e, "failed to store experience");
            }
        }

        if let Some(working) = &self.collaborators.working {
            let item = match outcome {
                Ok(result) => WorkingMemoryItem::new(
                    json!({ "task": task.to_value(), "result": result, "agent": agent }),
                    MemoryItemPriority::Medium,
                    vec!["task".to_string(), "success".to_string(), agent.to_string()],
                ),
                Err(e) => WorkingMemoryItem::new(
                    json!({ "task": task.to_value(), "error": e.to_string(), "agent": agent }),
                    MemoryItemPriority::High,
                    vec!["task".to_string(), "error".to_string(), agent.to_string()],
                ),
            };
            if let Err(e) = working.add_item(item) {
                warn!(agent = %agent, error = %e, "failed to add working memory item");
            }
        }
    }
}

impl TaskDispatcher for AgentDispatch {
    /// Run `task` on `agent` through the agent's own communicator.
    ///
    /// The agent is `Busy` for the duration, then `Idle` on success or
    /// `Error` on failure. A reply shaped `{success: false, error}` counts as
    /// a failure.
    fn execute_task(&self, agent: &str, task: &TaskRequest) -> OrchestraResult<Value> {
        let communicator = self.registry.begin_task(agent)?;
        debug!(agent = %agent, action = %task.action_name(), "dispatching task");

        let started = Instant::now();
        let outcome = communicator
            .send_task_request(agent, task, 1, None)
            .and_then(|reply| check_reply(task, reply));
        let execution_time = started.elapsed().as_secs_f64();

        self.registry.finish_task(agent, outcome.is_ok());
        self.record(agent, task, &outcome, execution_time);

        match &outcome {
            Ok(_) => info!(agent = %agent, action = %task.action_name(), execution_time, "task completed"),
            Err(e) => warn!(agent = %agent, action = %task.action_name(), error = %e, "task failed"),
        }
        outcome
    }
}

fn check_reply(task: &TaskRequest, reply: Value) -> OrchestraResult<Value> {
    let failed = reply.get("success").and_then(Value::as_bool) == Some(false);
    match reply.get("error") {
        Some(error) if failed => Err(OrchestraError::StepExecutionFailed {
            step: task.action_name().to_string(),
            reason: error.as_str().map_or_else(|| error.to_string(), str::to_string),
        }),
        _ => Ok(reply),
    }
}
