//! # concerto-contracts
//!
//! Shared types, errors, and configuration for the Concerto runtime.
//!
//! All crates in the workspace import from here. No orchestration logic lives
//! in this crate; it holds data definitions, state predicates and error types.

pub mod agent;
pub mod capability;
pub mod config;
pub mod error;
pub mod journal;
pub mod memory;
pub mod message;
pub mod workflow;

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::{json, Map};

    use super::*;
    use agent::{CollaborationSession, CollaborationStatus};
    use capability::CapabilitySet;
    use config::RuntimeConfig;
    use error::OrchestraError;
    use message::{AgentMessage, AgentMessageType, Message, MessageKind};
    use workflow::{WorkflowExecution, WorkflowStatus};

    // ── Message expiry ───────────────────────────────────────────────────────

    #[test]
    fn zero_ttl_message_is_expired_immediately() {
        let msg = Message::new(MessageKind::Notification, "a", json!({})).with_ttl(0);
        assert!(msg.is_expired());
    }

    #[test]
    fn message_expires_once_age_reaches_ttl() {
        let msg = Message::new(MessageKind::Notification, "a", json!({})).with_ttl(10);
        assert!(!msg.is_expired_at(msg.created_at + Duration::seconds(9)));
        assert!(msg.is_expired_at(msg.created_at + Duration::seconds(10)));
    }

    #[test]
    fn priority_is_clamped() {
        let high = Message::new(MessageKind::Request, "a", json!({})).with_priority(9);
        let low = Message::new(MessageKind::Request, "a", json!({})).with_priority(0);
        assert_eq!(high.priority, 5);
        assert_eq!(low.priority, 1);
    }

    // ── AgentMessage conversion ──────────────────────────────────────────────

    #[test]
    fn agent_message_wraps_payload_and_flags() {
        let original = AgentMessage {
            sender: "planner".to_string(),
            receiver: "writer".to_string(),
            message_type: AgentMessageType::TaskRequest,
            payload: json!({ "task": { "action": "draft" } }),
            correlation_id: "planner_task_1".to_string(),
            priority: 3,
            requires_response: true,
            collaboration_context: None,
        };

        let message = original.to_message();
        assert_eq!(message.kind, MessageKind::TaskRequest);
        assert_eq!(message.receiver.as_deref(), Some("writer"));
        assert_eq!(message.payload["data"]["task"]["action"], "draft");
        assert_eq!(message.payload["requires_response"], true);

        let decoded = AgentMessage::from_message(&message).unwrap();
        assert_eq!(decoded.correlation_id, "planner_task_1");
        assert_eq!(decoded.priority, 3);
        assert!(decoded.requires_response);
        assert_eq!(decoded.payload, original.payload);
    }

    #[test]
    fn empty_receiver_becomes_broadcast() {
        let status = AgentMessage {
            sender: "writer".to_string(),
            receiver: String::new(),
            message_type: AgentMessageType::StatusUpdate,
            payload: json!({ "status": "ok" }),
            correlation_id: "writer_status_1".to_string(),
            priority: 1,
            requires_response: false,
            collaboration_context: None,
        };
        assert!(status.to_message().receiver.is_none());
    }

    #[test]
    fn plain_bus_kinds_are_not_agent_messages() {
        let msg = Message::new(MessageKind::Request, "a", json!({}));
        assert!(AgentMessage::from_message(&msg).is_none());
    }

    // ── CapabilitySet ────────────────────────────────────────────────────────

    #[test]
    fn capability_set_deduplicates_and_sorts() {
        let caps: CapabilitySet = ["write", "review", "write"].into_iter().collect();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.all().collect::<Vec<_>>(), vec!["review", "write"]);
        assert!(caps.has("review"));
        assert!(!caps.has("deploy"));
    }

    // ── Collaboration sessions ───────────────────────────────────────────────

    #[test]
    fn session_participants_are_deduplicated_in_order() {
        let session = CollaborationSession::new(
            "collab-1",
            "lead",
            &["a".to_string(), "lead".to_string(), "b".to_string(), "a".to_string()],
            "planning",
            Map::new(),
        );
        assert_eq!(session.participants, vec!["lead", "a", "b"]);
    }

    #[test]
    fn session_is_final_once_terminal() {
        let mut session = CollaborationSession::new("c", "lead", &[], "analysis", Map::new());
        assert!(session.fail("nobody came"));
        assert!(!session.complete());
        assert_eq!(session.status, CollaborationStatus::Failed);
        assert_eq!(session.shared_context["failure_reason"], "nobody came");

        session.record_result("lead", json!(1));
        assert!(session.results.is_empty());
    }

    // ── WorkflowExecution state machine ──────────────────────────────────────

    #[test]
    fn cancel_requires_running() {
        let mut exec = WorkflowExecution::new("wf-1", "wf");
        assert!(!exec.cancel(), "pending executions cannot be cancelled");

        assert!(exec.start());
        assert!(exec.cancel());
        assert_eq!(exec.status, WorkflowStatus::Cancelled);
        assert!(exec.ended_at.is_some());

        // Terminal states are final.
        assert!(!exec.finish(WorkflowStatus::Completed));
        assert_eq!(exec.status, WorkflowStatus::Cancelled);
    }

    #[test]
    fn elapsed_is_zero_before_start() {
        let exec = WorkflowExecution::new("wf-1", "wf");
        assert_eq!(exec.elapsed_seconds(), 0.0);
    }

    // ── Config ───────────────────────────────────────────────────────────────

    #[test]
    fn empty_config_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.communicator.workers, 4);
        assert_eq!(config.communicator.task_timeout_secs, 30);
        assert_eq!(config.communicator.collaboration_timeout_secs, 60);
        assert_eq!(config.workflow.parallel_workers, 8);
        assert_eq!(config.workflow.branch_timeout_secs, 300);
        assert_eq!(config.bus.default_ttl_seconds, 300);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [workflow]
            branch_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.workflow.branch_timeout_secs, 5);
        assert_eq!(config.workflow.parallel_workers, 8);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = RuntimeConfig::from_toml_str("[communicator]\nworkers = 0\n").unwrap_err();
        match err {
            OrchestraError::ConfigError { reason } => assert!(reason.contains("communicator.workers")),
            other => panic!("expected ConfigError, got {:?}", other),
        }
    }

    // ── Error display messages ───────────────────────────────────────────────

    #[test]
    fn error_messages_carry_context() {
        let busy = OrchestraError::AgentBusy {
            agent: "writer".to_string(),
            status: "busy".to_string(),
        };
        assert!(busy.to_string().contains("writer"));

        let step = OrchestraError::StepExecutionFailed {
            step: "draft".to_string(),
            reason: "agent crashed".to_string(),
        };
        let msg = step.to_string();
        assert!(msg.contains("draft"));
        assert!(msg.contains("agent crashed"));

        let quota = OrchestraError::QuotaExceeded {
            entity: "wf-1".to_string(),
            reason: "rate limit".to_string(),
        };
        assert!(quota.to_string().contains("quota exceeded"));
    }
}
