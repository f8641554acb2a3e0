//! # concerto-agents
//!
//! Agents, their messaging, and the orchestrator that coordinates them.
//!
//! - [`communicator`] — per-agent typed messaging over the bus
//! - [`registry`]     — name → record + communicator, with the `Idle → Busy` claim
//! - [`sessions`]     — collaboration sessions
//! - [`dispatch`]     — `AgentDispatch`, the `TaskDispatcher` the workflow engine uses
//! - [`orchestrator`] — `AgentOrchestrator`, the entry point
//!
//! ## Usage
//!
//! ```rust,ignore
//! let bus = MessageBus::new(&config.bus);
//! bus.start()?;
//! let orchestrator = AgentOrchestrator::new(bus, config, Collaborators::none());
//! let writer = orchestrator.register_agent("writer", "author", caps, json!({}))?;
//! writer.register_task_handler(|msg| Ok(json!({ "draft": msg.payload["task"]["parameters"]["topic"] })));
//! let result = orchestrator.execute_task("writer", &TaskRequest::action("draft"))?;
//! ```

pub mod communicator;
pub mod dispatch;
pub mod orchestrator;
pub mod registry;
pub mod sessions;

pub use communicator::{AgentCommunicator, MessageHandler};
pub use dispatch::{AgentDispatch, Collaborators, TaskCounts};
pub use orchestrator::AgentOrchestrator;
pub use registry::{AgentRegistry, RegistryCounts};
pub use sessions::CollaborationSessions;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::{json, Map, Value};

    use concerto_bus::MessageBus;
    use concerto_contracts::{
        agent::{AgentStatus, CollaborationStatus, TaskRequest},
        capability::CapabilitySet,
        config::{BusConfig, CommunicatorConfig, RuntimeConfig},
        error::OrchestraError,
        memory::MemoryItemPriority,
    };
    use concerto_memory::{InMemoryEpisodicMemory, InMemoryKnowledgeGraph, InMemoryWorkingMemory};
    use concerto_workflow::{WorkflowDefinition, WorkflowStep};

    use super::*;

    struct Harness {
        orchestrator: Arc<AgentOrchestrator>,
        episodic: Arc<InMemoryEpisodicMemory>,
        working: Arc<InMemoryWorkingMemory>,
        graph: Arc<InMemoryKnowledgeGraph>,
    }

    fn harness() -> Harness {
        let config = RuntimeConfig {
            bus: BusConfig {
                poll_interval_ms: 5,
                ..BusConfig::default()
            },
            communicator: CommunicatorConfig {
                task_timeout_secs: 5,
                collaboration_timeout_secs: 1,
                ..CommunicatorConfig::default()
            },
            ..RuntimeConfig::default()
        };
        let bus = MessageBus::new(&config.bus);
        bus.start().unwrap();

        let episodic = Arc::new(InMemoryEpisodicMemory::new());
        let working = Arc::new(InMemoryWorkingMemory::new());
        let graph = Arc::new(InMemoryKnowledgeGraph::new());
        let collaborators = Collaborators::none()
            .with_episodic(episodic.clone())
            .with_working(working.clone())
            .with_knowledge(graph.clone());

        Harness {
            orchestrator: Arc::new(AgentOrchestrator::new(bus, config, collaborators)),
            episodic,
            working,
            graph,
        }
    }

    fn caps(names: &[&str]) -> CapabilitySet {
        names.iter().copied().collect()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    #[test]
    fn registration_is_unique_and_publishes_facts() {
        let h = harness();
        h.orchestrator
            .register_agent("writer", "author", caps(&["draft", "edit"]), json!({ "team": "docs" }))
            .unwrap();

        match h.orchestrator.register_agent("writer", "other", caps(&[]), json!({})) {
            Err(OrchestraError::AgentAlreadyRegistered { agent }) => assert_eq!(agent, "writer"),
            Err(other) => panic!("expected AgentAlreadyRegistered, got {:?}", other),
            Ok(_) => panic!("duplicate registration must fail"),
        }

        assert_eq!(h.graph.objects("writer", "is_a"), vec!["author"]);
        assert_eq!(h.graph.objects("writer", "can_do"), vec!["draft", "edit"]);

        let record = h.orchestrator.get_agent_status("writer").unwrap();
        assert_eq!(record.role, "author");
        assert_eq!(record.status, AgentStatus::Idle);
        assert_eq!(record.metadata["team"], "docs");
        assert_eq!(h.orchestrator.find_agents_by_capability("edit"), vec!["writer"]);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn unregister_releases_the_communicator() {
        let h = harness();
        let writer = h.orchestrator.register_agent("writer", "author", caps(&[]), json!({})).unwrap();
        assert!(h.orchestrator.unregister_agent("writer"));
        assert!(writer.is_closed());
        assert!(!h.orchestrator.unregister_agent("writer"));
        assert!(h.orchestrator.get_agent_status("writer").is_none());
        assert_eq!(h.orchestrator.bus().stats().subscribers_count, 0);
        h.orchestrator.bus().stop();
    }

    // ── Task dispatch ────────────────────────────────────────────────────────

    #[test]
    fn scenario_a_task_round_trip_moves_agent_through_busy() {
        let h = harness();
        let gate = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let writer = h.orchestrator.register_agent("writer", "author", caps(&["draft"]), json!({})).unwrap();
        let (g, r) = (Arc::clone(&gate), Arc::clone(&release));
        writer.register_task_handler(move |message| {
            g.wait();
            r.wait();
            Ok(json!({ "draft": message.payload["task"]["parameters"]["topic"] }))
        });

        let orchestrator = Arc::clone(&h.orchestrator);
        let running = thread::spawn(move || {
            let task = TaskRequest::action("draft").with_parameter("topic", json!("rust"));
            orchestrator.execute_task("writer", &task)
        });

        gate.wait();
        assert_eq!(h.orchestrator.get_agent_status("writer").unwrap().status, AgentStatus::Busy);
        assert!(h.orchestrator.find_agents_by_capability("draft").is_empty());
        match h.orchestrator.execute_task("writer", &TaskRequest::action("draft")) {
            Err(OrchestraError::AgentBusy { agent, .. }) => assert_eq!(agent, "writer"),
            other => panic!("expected AgentBusy, got {:?}", other),
        }
        release.wait();

        let result = running.join().unwrap().unwrap();
        assert_eq!(result, json!({ "draft": "rust" }));
        assert_eq!(h.orchestrator.get_agent_status("writer").unwrap().status, AgentStatus::Idle);

        let stats = h.orchestrator.get_orchestrator_stats();
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.successful_tasks, 1);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.registered_agents, 1);
        assert_eq!(stats.idle_agents, 1);

        let episodic = h.episodic.performance_stats(Some("writer"), None);
        assert_eq!(episodic["total_experiences"], 1);
        assert_eq!(episodic["success_rate"], 1.0);
        let notes = h.working.find_by_tag("success");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].priority, MemoryItemPriority::Medium);
        assert!(notes[0].tags.contains(&"writer".to_string()));
        h.orchestrator.bus().stop();
    }

    #[test]
    fn failed_task_marks_agent_error_and_is_remembered() {
        let h = harness();
        let flaky = h.orchestrator.register_agent("flaky", "worker", caps(&[]), json!({})).unwrap();
        flaky.register_task_handler(|_| Err(OrchestraError::HandlerFailed { reason: "disk full".to_string() }));

        match h.orchestrator.execute_task("flaky", &TaskRequest::action("save")) {
            Err(OrchestraError::StepExecutionFailed { step, reason }) => {
                assert_eq!(step, "save");
                assert!(reason.contains("disk full"));
            }
            other => panic!("expected StepExecutionFailed, got {:?}", other),
        }
        assert_eq!(h.orchestrator.get_agent_status("flaky").unwrap().status, AgentStatus::Error);

        let stats = h.orchestrator.get_orchestrator_stats();
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.failed_tasks, 1);

        let notes = h.working.find_by_tag("error");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].priority, MemoryItemPriority::High);
        let memory = h.orchestrator.get_memory_stats();
        assert_eq!(memory.episodic["success_rate"], 0.0);
        assert_eq!(memory.semantic["total_triples"], 1);

        match h.orchestrator.execute_task("flaky", &TaskRequest::action("save")) {
            Err(OrchestraError::AgentBusy { status, .. }) => assert_eq!(status, "error"),
            other => panic!("expected AgentBusy, got {:?}", other),
        }
        assert!(h.orchestrator.set_agent_status("flaky", AgentStatus::Idle));
        assert!(!h.orchestrator.set_agent_status("ghost", AgentStatus::Idle));
        assert_eq!(h.orchestrator.find_agents_by_capability("save"), Vec::<String>::new());
        assert_eq!(h.orchestrator.get_agent_status("flaky").unwrap().status, AgentStatus::Idle);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn unknown_agent_is_not_registered() {
        let h = harness();
        match h.orchestrator.execute_task("ghost", &TaskRequest::action("x")) {
            Err(OrchestraError::AgentNotRegistered { agent }) => assert_eq!(agent, "ghost"),
            other => panic!("expected AgentNotRegistered, got {:?}", other),
        }
        assert_eq!(h.orchestrator.get_orchestrator_stats().total_tasks, 0);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn default_task_handler_acknowledges() {
        let h = harness();
        h.orchestrator.register_agent("plain", "worker", caps(&[]), json!({})).unwrap();
        let reply = h.orchestrator.execute_task("plain", &TaskRequest::action("ping")).unwrap();
        assert_eq!(reply["status"], "received");
        assert_eq!(reply["message"], "Task request from plain processed");
        assert!(reply["timestamp"].is_string());
        h.orchestrator.bus().stop();
    }

    // ── Workflows ────────────────────────────────────────────────────────────

    #[test]
    fn scenario_b_step_output_flows_into_next_agent() {
        let h = harness();
        let a1 = h.orchestrator.register_agent("a1", "calc", caps(&[]), json!({})).unwrap();
        let a2 = h.orchestrator.register_agent("a2", "sink", caps(&[]), json!({})).unwrap();
        a1.register_task_handler(|_| Ok(json!(42)));
        a2.register_task_handler(|message| Ok(json!({ "got": message.payload["task"]["parameters"]["value"] })));

        h.orchestrator.load_workflow(
            WorkflowDefinition::new(
                "chain",
                vec![
                    WorkflowStep::task("task1", "a1", "compute"),
                    WorkflowStep::task("task2", "a2", "use").with_parameter("value", json!("{{task1_result}}")),
                ],
            )
            .unwrap(),
        );

        let outcome = h.orchestrator.execute_workflow("chain", json!({})).unwrap();
        assert!(outcome.success, "error: {:?}", outcome.error);
        let result = outcome.result.unwrap();
        assert_eq!(result["task1_result"], 42);
        assert_eq!(result["task2_result"], json!({ "got": 42 }));
        assert_eq!(h.orchestrator.get_orchestrator_stats().successful_tasks, 2);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn scenario_c_skipped_conditional_never_dispatches() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let publisher = h.orchestrator.register_agent("publisher", "pub", caps(&[]), json!({})).unwrap();
        publisher.register_task_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("published"))
        });

        let definition = WorkflowDefinition::from_json(&json!({
            "name": "gated",
            "steps": [{
                "name": "publish",
                "step_type": "conditional",
                "agent": "publisher",
                "action": "publish",
                "condition": "{{approved}}"
            }]
        }))
        .unwrap();
        h.orchestrator.load_workflow(definition);

        let outcome = h.orchestrator.execute_workflow("gated", json!({ "approved": false })).unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.result.unwrap()["publish_result"],
            json!({ "skipped": true, "reason": "condition_not_met" })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.orchestrator.get_orchestrator_stats().total_tasks, 0);

        let outcome = h.orchestrator.execute_workflow("gated", json!({ "approved": true })).unwrap();
        assert_eq!(outcome.result.unwrap()["publish_result"], "published");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn failing_agent_step_fails_the_workflow() {
        let h = harness();
        let broken = h.orchestrator.register_agent("broken", "worker", caps(&[]), json!({})).unwrap();
        broken.register_task_handler(|_| panic!("segfault simulation"));
        h.orchestrator.load_workflow(
            WorkflowDefinition::new("doomed", vec![WorkflowStep::task("only", "broken", "run")]).unwrap(),
        );

        let outcome = h.orchestrator.execute_workflow("doomed", json!({})).unwrap();
        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("Step 'only' failed:"), "got: {error}");
        assert!(error.contains("segfault simulation"));
        h.orchestrator.bus().stop();
    }

    // ── Collaboration ────────────────────────────────────────────────────────

    fn settled(h: &Harness, id: &str) -> CollaborationStatus {
        let mut status = CollaborationStatus::Active;
        wait_until(|| {
            status = h.orchestrator.get_collaboration(id).unwrap().status;
            status != CollaborationStatus::Active
        });
        status
    }

    #[test]
    fn collaboration_completes_when_someone_accepts() {
        let h = harness();
        for name in ["lead", "reviewer"] {
            h.orchestrator.register_agent(name, "dev", caps(&["review"]), json!({})).unwrap();
        }
        let mut context = Map::new();
        context.insert("pr".to_string(), json!(7));

        let id = h.orchestrator.start_collaboration(
            "lead",
            &["reviewer".to_string(), "ghost".to_string()],
            "code_review",
            context,
        );
        assert_eq!(settled(&h, &id), CollaborationStatus::Completed);

        let summary = h.orchestrator.get_collaboration(&id).unwrap();
        assert_eq!(summary.participants, vec!["lead", "reviewer", "ghost"]);
        assert_eq!(summary.results_count, 2);
        assert_eq!(summary.shared_context["pr"], 7);

        let stats = h.orchestrator.get_orchestrator_stats();
        assert_eq!(stats.total_collaborations, 1);
        assert_eq!(stats.active_collaborations, 0);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn collaboration_fails_when_everyone_declines() {
        let h = harness();
        for name in ["lead", "helper"] {
            h.orchestrator.register_agent(name, "dev", caps(&[]), json!({})).unwrap();
        }
        let id = h
            .orchestrator
            .start_collaboration("lead", &["helper".to_string()], "deployment", Map::new());
        assert_eq!(settled(&h, &id), CollaborationStatus::Failed);
        let summary = h.orchestrator.get_collaboration(&id).unwrap();
        assert_eq!(summary.shared_context["failure_reason"], "no participant accepted");
        assert!(!h.orchestrator.complete_collaboration(&id), "terminal sessions stay terminal");
        h.orchestrator.bus().stop();
    }

    #[test]
    fn custom_collaboration_handler_sees_offer() {
        let h = harness();
        h.orchestrator.register_agent("lead", "dev", caps(&[]), json!({})).unwrap();
        let picky = h.orchestrator.register_agent("picky", "dev", caps(&[]), json!({})).unwrap();
        picky.register_collaboration_handler(|offer| {
            let wanted = offer.payload["context"]["budget"].as_u64().unwrap_or(0) > 10;
            Ok(json!({ "accepted": wanted }))
        });

        let mut context = Map::new();
        context.insert("budget".to_string(), json!(100));
        let id = h.orchestrator.start_collaboration("lead", &["picky".to_string()], "anything", context);
        assert_eq!(settled(&h, &id), CollaborationStatus::Completed);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn manual_session_transitions() {
        let h = harness();
        let id = h.orchestrator.start_collaboration("solo", &[], "planning", Map::new());
        // No one to invite, so the session settles at once.
        assert_eq!(h.orchestrator.get_collaboration(&id).unwrap().status, CollaborationStatus::Failed);
        assert!(!h.orchestrator.fail_collaboration(&id, "again"));
        assert!(!h.orchestrator.complete_collaboration("missing"));
        h.orchestrator.bus().stop();
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    #[test]
    fn cleanup_releases_everything_and_is_idempotent() {
        let h = harness();
        let a = h.orchestrator.register_agent("a", "worker", caps(&[]), json!({})).unwrap();
        h.orchestrator.start_collaboration("a", &[], "planning", Map::new());

        h.orchestrator.cleanup();
        h.orchestrator.cleanup();
        assert!(a.is_closed());
        assert!(h.orchestrator.get_all_agents().is_empty());
        let stats = h.orchestrator.get_orchestrator_stats();
        assert_eq!(stats.registered_agents, 0);
        assert_eq!(stats.active_collaborations, 0);
        h.orchestrator.bus().stop();
    }

    #[test]
    fn memory_stats_are_null_without_collaborators() {
        let bus = MessageBus::default();
        let orchestrator = AgentOrchestrator::new(bus, RuntimeConfig::default(), Collaborators::none());
        let stats = orchestrator.get_memory_stats();
        assert_eq!(stats.episodic, Value::Null);
        assert_eq!(stats.semantic, Value::Null);
        assert_eq!(stats.working, Value::Null);
    }
}
