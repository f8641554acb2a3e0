//! Workflow execution state shared between the engine and its callers.
//!
//! Definitions and step parsing live in `concerto-workflow`; this module
//! holds the run-time records callers observe.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Execution state machine: `Pending → Running → {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal states are final; nothing moves an execution out of them.
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkflowStatus::Pending | WorkflowStatus::Running => false,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable run state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
    pub results: Map<String, Value>,
    pub errors: Vec<String>,
    pub context: Map<String, Value>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Pending,
            started_at: None,
            ended_at: None,
            current_step: None,
            results: Map::new(),
            errors: Vec::new(),
            context: Map::new(),
        }
    }

    /// `Pending → Running`. Returns false from any other state.
    pub fn start(&mut self) -> bool {
        if self.status != WorkflowStatus::Pending {
            return false;
        }
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Move a running execution into a terminal state.
    ///
    /// Returns false (and changes nothing) unless the execution is `Running`,
    /// so a cancellation is never overwritten by a late completion.
    pub fn finish(&mut self, status: WorkflowStatus) -> bool {
        if self.status != WorkflowStatus::Running || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        true
    }

    /// `Running → Cancelled`.
    pub fn cancel(&mut self) -> bool {
        self.finish(WorkflowStatus::Cancelled)
    }

    /// Wall-clock seconds between start and end (or now, if still running).
    pub fn elapsed_seconds(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(start).num_microseconds().unwrap_or(0) as f64 / 1e6
            }
            None => 0.0,
        }
    }
}

/// What `execute_workflow` returns to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub workflow_id: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Seconds.
    pub execution_time: f64,
}
