//! Demo scenarios and the runtime wiring they share.

pub mod collaboration;
pub mod content_pipeline;
pub mod safe_replay;
pub mod task_dispatch;

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use concerto_agents::{AgentCommunicator, AgentOrchestrator, Collaborators};
use concerto_bus::MessageBus;
use concerto_contracts::{capability::CapabilitySet, config::RuntimeConfig, error::OrchestraResult};
use concerto_memory::{InMemoryEpisodicMemory, InMemoryKnowledgeGraph, InMemoryWorkingMemory};

/// A started bus plus an orchestrator reporting to in-memory collaborators.
pub struct Runtime {
    pub orchestrator: AgentOrchestrator,
    pub graph: Arc<InMemoryKnowledgeGraph>,
}

impl Runtime {
    pub fn start(config: &RuntimeConfig) -> OrchestraResult<Self> {
        let bus = MessageBus::new(&config.bus);
        bus.start()?;
        debug!(poll_interval_ms = config.bus.poll_interval_ms, "demo bus started");

        let graph = Arc::new(InMemoryKnowledgeGraph::new());
        let collaborators = Collaborators::none()
            .with_episodic(Arc::new(InMemoryEpisodicMemory::new()))
            .with_working(Arc::new(InMemoryWorkingMemory::new()))
            .with_knowledge(graph.clone());

        Ok(Self {
            orchestrator: AgentOrchestrator::new(bus, config.clone(), collaborators),
            graph,
        })
    }

    pub fn agent(&self, name: &str, role: &str, capabilities: &[&str]) -> OrchestraResult<Arc<AgentCommunicator>> {
        let capabilities: CapabilitySet = capabilities.iter().copied().collect();
        self.orchestrator
            .register_agent(name, role, capabilities, json!({ "demo": true }))
    }

    /// Release every agent and stop the bus.
    pub fn shutdown(self) {
        self.orchestrator.cleanup();
        self.orchestrator.bus().stop();
    }
}
