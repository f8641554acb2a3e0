//! The workflow engine.
//!
//! Executes registered definitions step by step. Each run:
//!
//! 1. Registers a `WorkflowExecution` as active (`Pending → Running`).
//! 2. Seeds the context with a copy of the input.
//! 3. Runs the steps in definition order, storing each output under
//!    `context["<step>_result"]` and `results[<step>]`. Cancellation is
//!    checked before every step.
//! 4. Stops at the first failing step (`Failed`), or finishes `Completed`
//!    with `context["final_result"]` (or the whole context) as its result.
//! 5. Always removes the execution from the active set.
//!
//! Parallel branches and loop iterations contain their own failures; only a
//! top-level step failure aborts the run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use concerto_contracts::{
    agent::TaskRequest,
    config::WorkflowConfig,
    error::{OrchestraError, OrchestraResult},
    workflow::{WorkflowExecution, WorkflowOutcome, WorkflowStatus},
};
use concerto_core::{spawn_task, traits::TaskDispatcher, WorkerPool};

use crate::definition::{LoopItems, StepKind, WorkflowDefinition, WorkflowStep};
use crate::execution::{ActiveExecutions, SharedExecution};
use crate::template::{evaluate_condition, resolve_loop_items, resolve_parameters};

/// Error recorded when a run stops because it was cancelled.
pub const CANCELLED_ERROR: &str = "workflow cancelled";

struct EngineCore {
    dispatcher: Arc<dyn TaskDispatcher>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    active: ActiveExecutions,
    pool: WorkerPool,
    branch_timeout: Duration,
}

pub struct WorkflowEngine {
    core: Arc<EngineCore>,
}

impl WorkflowEngine {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, config: &WorkflowConfig) -> Self {
        Self {
            core: Arc::new(EngineCore {
                dispatcher,
                definitions: RwLock::new(HashMap::new()),
                active: ActiveExecutions::new(),
                pool: WorkerPool::new("concerto-workflow", config.parallel_workers),
                branch_timeout: config.branch_timeout(),
            }),
        }
    }

    // ── Definitions ──────────────────────────────────────────────────────────

    /// Register `definition` under its name, replacing any previous one.
    pub fn load_workflow_definition(&self, definition: WorkflowDefinition) {
        let name = definition.name.clone();
        let replaced = self
            .core
            .definitions
            .write()
            .expect("workflow definitions lock poisoned")
            .insert(name.clone(), Arc::new(definition))
            .is_some();
        info!(workflow = %name, replaced, "workflow definition loaded");
    }

    /// Parse, validate and register a JSON definition. Returns its name.
    pub fn load_workflow_json(&self, document: &Value) -> OrchestraResult<String> {
        let definition = WorkflowDefinition::from_json(document)?;
        let name = definition.name.clone();
        self.load_workflow_definition(definition);
        Ok(name)
    }

    /// Registered definition names, sorted.
    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .core
            .definitions
            .read()
            .expect("workflow definitions lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn get_definition(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.core
            .definitions
            .read()
            .expect("workflow definitions lock poisoned")
            .get(name)
            .cloned()
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run `name` to completion on the calling thread.
    ///
    /// `WorkflowNotFound` and `DuplicateWorkflowId` are errors; a step
    /// failure or cancellation is an outcome with `success: false`.
    pub fn execute_workflow(
        &self,
        name: &str,
        input: Value,
        workflow_id: Option<&str>,
    ) -> OrchestraResult<WorkflowOutcome> {
        let prepared = self.prepare(name, input, workflow_id)?;
        Ok(self.core.run(prepared))
    }

    /// Run `name` on a background thread.
    ///
    /// The execution is registered before this returns, so it can be queried
    /// or cancelled immediately through the returned id.
    pub fn submit_workflow(
        &self,
        name: &str,
        input: Value,
        workflow_id: Option<&str>,
    ) -> OrchestraResult<(String, JoinHandle<WorkflowOutcome>)> {
        let prepared = self.prepare(name, input, workflow_id)?;
        let id = prepared.workflow_id.clone();
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name(format!("workflow-{}", id))
            .spawn(move || core.run(prepared));
        match spawned {
            Ok(handle) => Ok((id, handle)),
            Err(e) => {
                self.core.active.remove(&id);
                Err(OrchestraError::HandlerFailed {
                    reason: format!("failed to spawn workflow thread: {}", e),
                })
            }
        }
    }

    /// Snapshot of an active execution. `None` once it has finished.
    pub fn get_workflow_status(&self, workflow_id: &str) -> Option<WorkflowExecution> {
        self.core.active.snapshot(workflow_id)
    }

    /// Cancel a running execution. False if unknown, finished or not running.
    pub fn cancel_workflow(&self, workflow_id: &str) -> bool {
        let cancelled = self.core.active.cancel(workflow_id);
        if cancelled {
            info!(workflow_id = %workflow_id, "workflow cancelled");
        }
        cancelled
    }

    /// Ids of executions still running, sorted.
    pub fn active_workflows(&self) -> Vec<String> {
        self.core.active.ids()
    }

    /// Stop the branch worker pool. Later parallel steps report their branches as failed.
    pub fn shutdown(&self) {
        self.core.pool.shutdown();
    }

    fn prepare(&self, name: &str, input: Value, workflow_id: Option<&str>) -> OrchestraResult<PreparedRun> {
        let definition = self
            .get_definition(name)
            .ok_or_else(|| OrchestraError::WorkflowNotFound {
                workflow: name.to_string(),
            })?;
        let workflow_id = workflow_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_{}", name, uuid::Uuid::new_v4().simple()));
        let execution = self
            .core
            .active
            .insert(WorkflowExecution::new(workflow_id.clone(), name))?;
        let context = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Ok(PreparedRun {
            workflow_id,
            definition,
            execution,
            context,
        })
    }
}

struct PreparedRun {
    workflow_id: String,
    definition: Arc<WorkflowDefinition>,
    execution: SharedExecution,
    context: Map<String, Value>,
}

// ── Run loop ─────────────────────────────────────────────────────────────────

impl EngineCore {
    fn run(self: &Arc<Self>, prepared: PreparedRun) -> WorkflowOutcome {
        let PreparedRun {
            workflow_id,
            definition,
            execution,
            mut context,
        } = prepared;

        {
            let mut exec = execution.lock().expect("workflow execution lock poisoned");
            exec.start();
            exec.context = context.clone();
        }
        info!(workflow_id = %workflow_id, workflow = %definition.name, "workflow started");

        let result = self.run_steps(&workflow_id, &definition, &execution, &mut context);

        let outcome = {
            let mut exec = execution.lock().expect("workflow execution lock poisoned");
            let result = match result {
                Ok(value) => {
                    if exec.finish(WorkflowStatus::Completed) {
                        exec.results.insert("final_result".to_string(), value.clone());
                        Ok(value)
                    } else {
                        Err(CANCELLED_ERROR.to_string())
                    }
                }
                Err(message) => {
                    exec.finish(WorkflowStatus::Failed);
                    Err(message)
                }
            };
            if let Err(message) = &result {
                if message == CANCELLED_ERROR {
                    exec.errors.push(message.clone());
                }
            }
            let (result, error) = match result {
                Ok(value) => (Some(value), None),
                Err(message) => (None, Some(message)),
            };
            WorkflowOutcome {
                success: error.is_none(),
                workflow_id: workflow_id.clone(),
                result,
                error,
                execution_time: exec.elapsed_seconds(),
            }
        };

        self.active.remove(&workflow_id);

        match &outcome.error {
            None => info!(
                workflow_id = %workflow_id,
                execution_time = outcome.execution_time,
                "workflow completed"
            ),
            Some(error) => warn!(workflow_id = %workflow_id, error = %error, "workflow did not complete"),
        }
        outcome
    }

    /// Run every step in order. `Err` carries the message recorded on the execution.
    fn run_steps(
        self: &Arc<Self>,
        workflow_id: &str,
        definition: &WorkflowDefinition,
        execution: &SharedExecution,
        context: &mut Map<String, Value>,
    ) -> Result<Value, String> {
        for step in &definition.steps {
            {
                let mut exec = execution.lock().expect("workflow execution lock poisoned");
                if exec.status == WorkflowStatus::Cancelled {
                    return Err(CANCELLED_ERROR.to_string());
                }
                exec.current_step = Some(step.name.clone());
            }
            debug!(workflow_id = %workflow_id, step = %step.name, kind = %step.kind, "executing step");

            match self.execute_step(step, context, false) {
                Ok(output) => {
                    let key = format!("{}_result", step.name);
                    context.insert(key.clone(), output.clone());
                    let mut exec = execution.lock().expect("workflow execution lock poisoned");
                    exec.context.insert(key, output.clone());
                    exec.results.insert(step.name.clone(), output);
                }
                Err(e) => {
                    let message = format!("Step '{}' failed: {}", step.name, failure_reason(&step.name, &e));
                    warn!(workflow_id = %workflow_id, step = %step.name, error = %e, "step failed");
                    execution
                        .lock()
                        .expect("workflow execution lock poisoned")
                        .errors
                        .push(message.clone());
                    return Err(message);
                }
            }
        }
        Ok(context
            .get("final_result")
            .cloned()
            .unwrap_or_else(|| Value::Object(context.clone())))
    }

    // ── Step kinds ───────────────────────────────────────────────────────────

    /// `nested` is true when the caller is already a parallel branch.
    fn execute_step(
        self: &Arc<Self>,
        step: &WorkflowStep,
        context: &Map<String, Value>,
        nested: bool,
    ) -> OrchestraResult<Value> {
        match &step.kind {
            StepKind::Task => self.execute_task(step, context),
            StepKind::Parallel { branches } => Ok(self.execute_parallel(branches, context, nested)),
            StepKind::Conditional { condition } => {
                if evaluate_condition(condition, context)? {
                    self.execute_task(step, context)
                } else {
                    debug!(step = %step.name, condition = %condition, "condition not met; skipping");
                    Ok(json!({ "skipped": true, "reason": "condition_not_met" }))
                }
            }
            StepKind::Loop { variable, items } => self.execute_loop(step, variable, items, context),
        }
    }

    fn execute_task(&self, step: &WorkflowStep, context: &Map<String, Value>) -> OrchestraResult<Value> {
        let agent = step.agent.as_deref().ok_or_else(|| OrchestraError::StepExecutionFailed {
            step: step.name.clone(),
            reason: "no agent specified".to_string(),
        })?;
        let task = TaskRequest {
            action: step.action.clone(),
            parameters: resolve_parameters(&step.parameters, context),
            context: context.clone(),
        };
        self.dispatcher.execute_task(agent, &task)
    }

    /// One entry per branch. Branch failures and timeouts become `{error}`.
    ///
    /// Top-level branches share the bounded pool. Branches of a nested
    /// parallel step get their own threads, since their parent already holds
    /// a pool worker and would otherwise wait on itself.
    fn execute_parallel(
        self: &Arc<Self>,
        branches: &[WorkflowStep],
        context: &Map<String, Value>,
        nested: bool,
    ) -> Value {
        let handles: Vec<_> = branches
            .iter()
            .map(|branch| {
                let core = Arc::clone(self);
                let branch = branch.clone();
                let context = context.clone();
                let name = branch.name.clone();
                let job = move || core.execute_step(&branch, &context, true);
                let handle = if nested {
                    spawn_task(format!("concerto-branch-{}", name), job)
                } else {
                    self.pool.submit(job)
                };
                (name, handle)
            })
            .collect();

        let mut results = Map::new();
        for (name, handle) in handles {
            let slot = match handle.join_timeout(self.branch_timeout) {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    warn!(branch = %name, error = %e, "parallel branch failed");
                    json!({ "error": e.to_string() })
                }
                Err(e) => {
                    warn!(branch = %name, error = %e, "parallel branch did not finish");
                    json!({ "error": e.to_string() })
                }
            };
            results.insert(name, slot);
        }
        Value::Object(results)
    }

    /// One entry per item. Iteration failures become `{error, item, index}`.
    fn execute_loop(
        &self,
        step: &WorkflowStep,
        variable: &str,
        items: &LoopItems,
        context: &Map<String, Value>,
    ) -> OrchestraResult<Value> {
        let items = resolve_loop_items(items, context).map_err(|reason| OrchestraError::StepExecutionFailed {
            step: step.name.clone(),
            reason,
        })?;

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let mut iteration = context.clone();
            iteration.insert(variable.to_string(), item.clone());
            iteration.insert("loop_index".to_string(), json!(index));
            match self.execute_task(step, &iteration) {
                Ok(value) => results.push(value),
                Err(e) => {
                    warn!(step = %step.name, index, error = %e, "loop iteration failed");
                    results.push(json!({ "error": e.to_string(), "item": item, "index": index }));
                }
            }
        }
        Ok(Value::Array(results))
    }
}

/// The reason text for a failed step, without repeating the step name.
fn failure_reason(step: &str, error: &OrchestraError) -> String {
    match error {
        OrchestraError::StepExecutionFailed { step: failed, reason } if failed == step => reason.clone(),
        other => other.to_string(),
    }
}
