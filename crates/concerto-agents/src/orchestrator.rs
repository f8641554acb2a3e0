//! The agent orchestrator.
//!
//! Ties the runtime together: agents register here and get a communicator on
//! the shared bus; tasks are dispatched through `AgentDispatch`; workflows
//! run on a `WorkflowEngine` that dispatches through the same capability;
//! collaborations are offered to participants on a background pool.
//!
//! The bus must be running for tasks and offers to be delivered.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use concerto_bus::MessageBus;
use concerto_contracts::{
    agent::{AgentRecord, AgentStatus, CollaborationSummary, MemoryStats, OrchestratorStats, TaskRequest},
    capability::CapabilitySet,
    config::RuntimeConfig,
    error::{OrchestraError, OrchestraResult},
    message::AgentMessage,
    workflow::WorkflowOutcome,
};
use concerto_core::{traits::TaskDispatcher, WorkerPool};
use concerto_workflow::{WorkflowDefinition, WorkflowEngine};

use crate::communicator::{AgentCommunicator, DEFAULT_OFFER_PRIORITY};
use crate::dispatch::{AgentDispatch, Collaborators};
use crate::registry::AgentRegistry;
use crate::sessions::CollaborationSessions;

/// Collaboration types the default handler accepts.
pub const ACCEPTED_COLLABORATIONS: [&str; 3] = ["code_review", "planning", "analysis"];

/// Source recorded on knowledge-graph facts published at registration.
const GRAPH_SOURCE: &str = "orchestrator";

pub struct AgentOrchestrator {
    bus: MessageBus,
    config: RuntimeConfig,
    registry: Arc<AgentRegistry>,
    sessions: Arc<CollaborationSessions>,
    dispatch: Arc<AgentDispatch>,
    engine: WorkflowEngine,
    collaborators: Collaborators,
    offers: WorkerPool,
    total_collaborations: AtomicU64,
    closed: AtomicBool,
}

impl AgentOrchestrator {
    pub fn new(bus: MessageBus, config: RuntimeConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let dispatch = Arc::new(AgentDispatch::new(Arc::clone(&registry), collaborators.clone()));
        let dispatcher: Arc<dyn TaskDispatcher> = dispatch.clone();
        let engine = WorkflowEngine::new(dispatcher, &config.workflow);
        let offers = WorkerPool::new("concerto-collab", config.orchestrator.collaboration_workers);
        Self {
            bus,
            config,
            registry,
            sessions: Arc::new(CollaborationSessions::new()),
            dispatch,
            engine,
            collaborators,
            offers,
            total_collaborations: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register an agent and return its communicator.
    ///
    /// The communicator comes with the default task and collaboration
    /// handlers installed; callers replace them to give the agent behaviour.
    pub fn register_agent(
        &self,
        name: &str,
        role: &str,
        capabilities: CapabilitySet,
        metadata: Value,
    ) -> OrchestraResult<Arc<AgentCommunicator>> {
        if self.registry.contains(name) {
            return Err(OrchestraError::AgentAlreadyRegistered {
                agent: name.to_string(),
            });
        }

        let communicator = Arc::new(AgentCommunicator::new(
            name,
            self.bus.clone(),
            &self.config.communicator,
            self.config.bus.default_ttl_seconds,
        ));
        communicator.register_task_handler(default_task_reply);
        let registry: Weak<AgentRegistry> = Arc::downgrade(&self.registry);
        let agent = name.to_string();
        communicator.register_collaboration_handler(move |offer| collaboration_reply(&registry, &agent, offer));

        let record = AgentRecord::new(name, role, capabilities.clone(), metadata);
        self.registry.insert(record, Arc::clone(&communicator))?;

        if let Some(graph) = &self.collaborators.knowledge {
            let facts = std::iter::once(("is_a", role)).chain(capabilities.all().map(|c| ("can_do", c)));
            for (predicate, object) in facts {
                if let Err(e) = graph.add_triple(name, predicate, object, GRAPH_SOURCE) {
                    warn!(agent = %name, predicate, object, error = %e, "failed to publish agent fact");
                }
            }
        }

        info!(agent = %name, role = %role, capabilities = capabilities.len(), "agent registered");
        Ok(communicator)
    }

    /// Remove an agent and release its communicator. False if it was not registered.
    pub fn unregister_agent(&self, name: &str) -> bool {
        match self.registry.remove(name) {
            Some(communicator) => {
                communicator.cleanup();
                info!(agent = %name, "agent unregistered");
                true
            }
            None => false,
        }
    }

    // ── Tasks and workflows ──────────────────────────────────────────────────

    /// Run one task on `agent`. See [`AgentDispatch`] for state and memory effects.
    pub fn execute_task(&self, agent: &str, task: &TaskRequest) -> OrchestraResult<Value> {
        self.dispatch.execute_task(agent, task)
    }

    pub fn load_workflow(&self, definition: WorkflowDefinition) {
        self.engine.load_workflow_definition(definition);
    }

    pub fn execute_workflow(&self, name: &str, input: Value) -> OrchestraResult<WorkflowOutcome> {
        self.engine.execute_workflow(name, input, None)
    }

    pub fn workflow_engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    // ── Collaboration ────────────────────────────────────────────────────────

    /// Open a collaboration session and offer it to every participant.
    ///
    /// Returns the session id immediately. Offers go out on the collaboration
    /// pool through each participant's own communicator; once every reply is
    /// in, the session completes if anyone accepted and fails otherwise.
    pub fn start_collaboration(
        &self,
        initiator: &str,
        participants: &[String],
        collaboration_type: &str,
        context: Map<String, Value>,
    ) -> String {
        let id = format!("collab_{}", uuid::Uuid::new_v4().simple());
        let members = self
            .sessions
            .open(&id, initiator, participants, collaboration_type, context.clone());
        self.total_collaborations.fetch_add(1, Ordering::Relaxed);
        info!(
            collaboration_id = %id,
            initiator = %initiator,
            collaboration_type = %collaboration_type,
            participants = members.len(),
            "collaboration started"
        );

        let invitees: Vec<String> = members.into_iter().filter(|m| m != initiator).collect();
        if invitees.is_empty() {
            self.sessions.settle(&id);
            return id;
        }

        let remaining = Arc::new(AtomicUsize::new(invitees.len()));
        for participant in invitees {
            let registry = Arc::clone(&self.registry);
            let sessions = Arc::clone(&self.sessions);
            let remaining = Arc::clone(&remaining);
            let id = id.clone();
            let collaboration_type = collaboration_type.to_string();
            let context = context.clone();
            // Not joined; the job reports through the session.
            let _ = self.offers.submit(move || {
                let reply = offer_to(&registry, &participant, &collaboration_type, &context);
                debug!(collaboration_id = %id, participant = %participant, reply = %reply, "collaboration reply");
                sessions.record_result(&id, &participant, reply);
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    sessions.settle(&id);
                }
            });
        }
        id
    }

    pub fn get_collaboration(&self, id: &str) -> Option<CollaborationSummary> {
        self.sessions.summary(id)
    }

    /// Mark a session completed. False if unknown or already terminal.
    pub fn complete_collaboration(&self, id: &str) -> bool {
        self.sessions.complete(id)
    }

    /// Mark a session failed. False if unknown or already terminal.
    pub fn fail_collaboration(&self, id: &str, reason: &str) -> bool {
        self.sessions.fail(id, reason)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_agent_status(&self, name: &str) -> Option<AgentRecord> {
        self.registry.record(name)
    }

    /// Override an agent's status, e.g. to return an `Error` agent to `Idle`.
    /// False if the agent is not registered.
    pub fn set_agent_status(&self, name: &str, status: AgentStatus) -> bool {
        self.registry.set_status(name, status)
    }

    /// Every registered agent, sorted by name.
    pub fn get_all_agents(&self) -> Vec<AgentRecord> {
        self.registry.records()
    }

    /// Idle agents advertising `capability`, sorted.
    pub fn find_agents_by_capability(&self, capability: &str) -> Vec<String> {
        self.registry.find_by_capability(capability)
    }

    pub fn get_orchestrator_stats(&self) -> OrchestratorStats {
        let tasks = self.dispatch.counts();
        let agents = self.registry.counts();
        OrchestratorStats {
            total_tasks: tasks.total,
            successful_tasks: tasks.successful,
            failed_tasks: tasks.failed,
            active_collaborations: self.sessions.active_count() as u64,
            total_collaborations: self.total_collaborations.load(Ordering::Relaxed),
            registered_agents: agents.registered,
            idle_agents: agents.idle,
            busy_agents: agents.busy,
        }
    }

    /// Collaborator statistics. A missing collaborator reports `null`.
    pub fn get_memory_stats(&self) -> MemoryStats {
        let collaborators = &self.collaborators;
        MemoryStats {
            episodic: collaborators.episodic.as_ref().map_or(Value::Null, |m| m.statistics()),
            semantic: collaborators.knowledge.as_ref().map_or(Value::Null, |g| g.statistics()),
            working: collaborators.working.as_ref().map_or(Value::Null, |m| m.statistics()),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Release every communicator, drop all sessions and stop the pools. Idempotent.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for communicator in self.registry.drain() {
            communicator.cleanup();
        }
        self.sessions.clear();
        self.offers.shutdown();
        self.engine.shutdown();
        info!("orchestrator cleaned up");
    }
}

impl Drop for AgentOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ── Default handlers ─────────────────────────────────────────────────────────

fn default_task_reply(request: &AgentMessage) -> OrchestraResult<Value> {
    Ok(json!({
        "status": "received",
        "message": format!("Task request from {} processed", request.sender),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn collaboration_reply(registry: &Weak<AgentRegistry>, agent: &str, offer: &AgentMessage) -> OrchestraResult<Value> {
    let kind = offer
        .payload
        .get("collaboration_type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if !ACCEPTED_COLLABORATIONS.contains(&kind) {
        return Ok(json!({
            "accepted": false,
            "reason": format!("Not suitable for {} collaboration", kind),
        }));
    }
    let capabilities: Vec<String> = registry
        .upgrade()
        .and_then(|registry| registry.capabilities(agent))
        .map(|caps| caps.all().map(str::to_string).collect())
        .unwrap_or_default();
    Ok(json!({
        "accepted": true,
        "reason": format!("Accepting {} collaboration", kind),
        "capabilities": capabilities,
    }))
}

fn offer_to(registry: &AgentRegistry, participant: &str, collaboration_type: &str, context: &Map<String, Value>) -> Value {
    let Some(communicator) = registry.communicator(participant) else {
        return json!({ "accepted": false, "reason": "not_registered" });
    };
    communicator
        .offer_collaboration(participant, collaboration_type, context, DEFAULT_OFFER_PRIORITY)
        .unwrap_or_else(|e| json!({ "accepted": false, "reason": e.to_string() }))
}
