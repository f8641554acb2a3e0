//! The agent registry.
//!
//! Maps agent name → record plus the agent's communicator. All state lives
//! behind one mutex, which is never held across a blocking call: dispatch
//! takes a clone of the communicator's `Arc` and releases the lock before
//! sending anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use concerto_contracts::{
    agent::{AgentRecord, AgentStatus},
    capability::CapabilitySet,
    error::{OrchestraError, OrchestraResult},
};

use crate::communicator::AgentCommunicator;

struct RegisteredAgent {
    record: AgentRecord,
    communicator: Arc<AgentCommunicator>,
}

/// Counts of registered agents by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub registered: usize,
    pub idle: usize,
    pub busy: usize,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent. Fails with `AgentAlreadyRegistered` if the name is taken.
    pub fn insert(&self, record: AgentRecord, communicator: Arc<AgentCommunicator>) -> OrchestraResult<()> {
        let mut agents = self.agents.lock().expect("agent registry lock poisoned");
        if agents.contains_key(&record.name) {
            return Err(OrchestraError::AgentAlreadyRegistered { agent: record.name });
        }
        agents.insert(record.name.clone(), RegisteredAgent { record, communicator });
        Ok(())
    }

    /// Remove an agent and hand back its communicator for release.
    pub fn remove(&self, name: &str) -> Option<Arc<AgentCommunicator>> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .remove(name)
            .map(|agent| agent.communicator)
    }

    /// Remove every agent, returning their communicators.
    pub fn drain(&self) -> Vec<Arc<AgentCommunicator>> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .drain()
            .map(|(_, agent)| agent.communicator)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.lock().expect("agent registry lock poisoned").contains_key(name)
    }

    // ── Dispatch state ───────────────────────────────────────────────────────

    /// Claim an idle agent for one task: `Idle → Busy` as a single check-and-set.
    ///
    /// Returns the agent's communicator. `AgentNotRegistered` for unknown
    /// names, `AgentBusy` when the agent is in any state other than `Idle`.
    pub fn begin_task(&self, name: &str) -> OrchestraResult<Arc<AgentCommunicator>> {
        let mut agents = self.agents.lock().expect("agent registry lock poisoned");
        let agent = agents.get_mut(name).ok_or_else(|| OrchestraError::AgentNotRegistered {
            agent: name.to_string(),
        })?;
        if agent.record.status != AgentStatus::Idle {
            return Err(OrchestraError::AgentBusy {
                agent: name.to_string(),
                status: agent.record.status.to_string(),
            });
        }
        agent.record.status = AgentStatus::Busy;
        agent.record.last_seen = Utc::now();
        Ok(Arc::clone(&agent.communicator))
    }

    /// Release an agent after its task: `Idle` on success, `Error` on failure.
    ///
    /// A no-op if the agent was unregistered while the task ran.
    pub fn finish_task(&self, name: &str, success: bool) {
        let mut agents = self.agents.lock().expect("agent registry lock poisoned");
        if let Some(agent) = agents.get_mut(name) {
            agent.record.status = if success { AgentStatus::Idle } else { AgentStatus::Error };
            agent.record.last_seen = Utc::now();
        }
    }

    /// Force an agent's status, e.g. to bring an `Error` agent back to `Idle`.
    pub fn set_status(&self, name: &str, status: AgentStatus) -> bool {
        let mut agents = self.agents.lock().expect("agent registry lock poisoned");
        match agents.get_mut(name) {
            Some(agent) => {
                agent.record.status = status;
                true
            }
            None => false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn record(&self, name: &str) -> Option<AgentRecord> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .get(name)
            .map(|agent| agent.record.clone())
    }

    /// Every record, sorted by name.
    pub fn records(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self
            .agents
            .lock()
            .expect("agent registry lock poisoned")
            .values()
            .map(|agent| agent.record.clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn communicator(&self, name: &str) -> Option<Arc<AgentCommunicator>> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .get(name)
            .map(|agent| Arc::clone(&agent.communicator))
    }

    pub fn capabilities(&self, name: &str) -> Option<CapabilitySet> {
        self.agents
            .lock()
            .expect("agent registry lock poisoned")
            .get(name)
            .map(|agent| agent.record.capabilities.clone())
    }

    /// Idle agents advertising `capability`, sorted.
    pub fn find_by_capability(&self, capability: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .lock()
            .expect("agent registry lock poisoned")
            .values()
            .filter(|agent| agent.record.status == AgentStatus::Idle && agent.record.capabilities.has(capability))
            .map(|agent| agent.record.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn counts(&self) -> RegistryCounts {
        let agents = self.agents.lock().expect("agent registry lock poisoned");
        let mut counts = RegistryCounts {
            registered: agents.len(),
            ..RegistryCounts::default()
        };
        for agent in agents.values() {
            match agent.record.status {
                AgentStatus::Idle => counts.idle += 1,
                AgentStatus::Busy => counts.busy += 1,
                AgentStatus::Error | AgentStatus::Offline => {}
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use concerto_bus::MessageBus;
    use concerto_contracts::{
        agent::{AgentRecord, AgentStatus},
        capability::CapabilitySet,
        config::CommunicatorConfig,
        error::OrchestraError,
    };

    use super::AgentRegistry;
    use crate::communicator::AgentCommunicator;

    fn add(registry: &AgentRegistry, bus: &MessageBus, name: &str, caps: &[&str]) {
        let capabilities: CapabilitySet = caps.iter().copied().collect();
        let record = AgentRecord::new(name, "worker", capabilities, json!({}));
        let communicator = AgentCommunicator::new(name, bus.clone(), &CommunicatorConfig::default(), 300);
        registry.insert(record, Arc::new(communicator)).unwrap();
    }

    #[test]
    fn names_are_unique() {
        let bus = MessageBus::default();
        let registry = AgentRegistry::new();
        add(&registry, &bus, "writer", &[]);

        let duplicate = AgentRecord::new("writer", "other", CapabilitySet::default(), json!({}));
        let communicator = AgentCommunicator::new("writer", bus.clone(), &CommunicatorConfig::default(), 300);
        match registry.insert(duplicate, Arc::new(communicator)) {
            Err(OrchestraError::AgentAlreadyRegistered { agent }) => assert_eq!(agent, "writer"),
            other => panic!("expected AgentAlreadyRegistered, got {:?}", other),
        }
        assert_eq!(registry.record("writer").unwrap().role, "worker");
    }

    #[test]
    fn begin_task_is_a_check_and_set() {
        let bus = MessageBus::default();
        let registry = AgentRegistry::new();
        add(&registry, &bus, "writer", &[]);

        registry.begin_task("writer").unwrap();
        assert_eq!(registry.record("writer").unwrap().status, AgentStatus::Busy);
        match registry.begin_task("writer") {
            Err(OrchestraError::AgentBusy { agent, status }) => {
                assert_eq!(agent, "writer");
                assert_eq!(status, "busy");
            }
            Err(other) => panic!("expected AgentBusy, got {:?}", other),
            Ok(_) => panic!("busy agent must not be claimed twice"),
        }

        registry.finish_task("writer", false);
        assert_eq!(registry.record("writer").unwrap().status, AgentStatus::Error);
        assert!(registry.begin_task("writer").is_err(), "errored agents are not idle");

        assert!(registry.set_status("writer", AgentStatus::Idle));
        assert!(registry.begin_task("writer").is_ok());
    }

    #[test]
    fn unknown_agents_are_not_registered() {
        let registry = AgentRegistry::new();
        match registry.begin_task("ghost") {
            Err(OrchestraError::AgentNotRegistered { agent }) => assert_eq!(agent, "ghost"),
            Err(other) => panic!("expected AgentNotRegistered, got {:?}", other),
            Ok(_) => panic!("unknown agent must not be claimed"),
        }
        registry.finish_task("ghost", true);
        assert!(registry.remove("ghost").is_none());
    }

    #[test]
    fn capability_search_only_returns_idle_agents() {
        let bus = MessageBus::default();
        let registry = AgentRegistry::new();
        add(&registry, &bus, "b", &["review", "write"]);
        add(&registry, &bus, "a", &["review"]);
        add(&registry, &bus, "c", &["write"]);

        assert_eq!(registry.find_by_capability("review"), vec!["a", "b"]);
        registry.begin_task("a").unwrap();
        assert_eq!(registry.find_by_capability("review"), vec!["b"]);

        let counts = registry.counts();
        assert_eq!(counts.registered, 3);
        assert_eq!(counts.idle, 2);
        assert_eq!(counts.busy, 1);
    }

    #[test]
    fn drain_returns_every_communicator() {
        let bus = MessageBus::default();
        let registry = AgentRegistry::new();
        add(&registry, &bus, "a", &[]);
        add(&registry, &bus, "b", &[]);
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.records().is_empty());
    }
}
