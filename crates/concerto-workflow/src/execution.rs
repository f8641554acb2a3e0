//! Registry of workflow executions that are still running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use concerto_contracts::{
    error::{OrchestraError, OrchestraResult},
    workflow::WorkflowExecution,
};

/// One execution, shared between the thread running it and status/cancel callers.
pub type SharedExecution = Arc<Mutex<WorkflowExecution>>;

/// Workflow id → running execution.
///
/// Lock order is registry first, then execution. The engine never takes the
/// registry lock while holding an execution lock.
#[derive(Default)]
pub struct ActiveExecutions {
    entries: Mutex<HashMap<String, SharedExecution>>,
}

impl ActiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `execution`. Fails if its id is already active.
    pub fn insert(&self, execution: WorkflowExecution) -> OrchestraResult<SharedExecution> {
        let mut entries = self.entries.lock().expect("active executions lock poisoned");
        if entries.contains_key(&execution.workflow_id) {
            return Err(OrchestraError::DuplicateWorkflowId {
                workflow_id: execution.workflow_id,
            });
        }
        let id = execution.workflow_id.clone();
        let shared = Arc::new(Mutex::new(execution));
        entries.insert(id, Arc::clone(&shared));
        Ok(shared)
    }

    pub fn get(&self, workflow_id: &str) -> Option<SharedExecution> {
        self.entries
            .lock()
            .expect("active executions lock poisoned")
            .get(workflow_id)
            .cloned()
    }

    /// A copy of the execution's current state.
    pub fn snapshot(&self, workflow_id: &str) -> Option<WorkflowExecution> {
        let shared = self.get(workflow_id)?;
        let execution = shared.lock().expect("workflow execution lock poisoned");
        Some(execution.clone())
    }

    pub fn remove(&self, workflow_id: &str) -> Option<SharedExecution> {
        self.entries
            .lock()
            .expect("active executions lock poisoned")
            .remove(workflow_id)
    }

    /// Cancel a running execution. False if unknown or not running.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        match self.get(workflow_id) {
            Some(shared) => shared
                .lock()
                .expect("workflow execution lock poisoned")
                .cancel(),
            None => false,
        }
    }

    /// Active workflow ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .expect("active executions lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("active executions lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
