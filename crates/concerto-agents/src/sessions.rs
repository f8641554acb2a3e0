//! Collaboration sessions, keyed by id.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::info;

use concerto_contracts::agent::{CollaborationSession, CollaborationStatus, CollaborationSummary};

/// Failure reason recorded when every participant declined.
pub const NO_PARTICIPANT_ACCEPTED: &str = "no participant accepted";

#[derive(Default)]
pub struct CollaborationSessions {
    sessions: Mutex<HashMap<String, CollaborationSession>>,
}

impl CollaborationSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session. Returns its participants (initiator first, deduplicated).
    pub fn open(
        &self,
        id: &str,
        initiator: &str,
        participants: &[String],
        collaboration_type: &str,
        shared_context: Map<String, Value>,
    ) -> Vec<String> {
        let session = CollaborationSession::new(id, initiator, participants, collaboration_type, shared_context);
        let members = session.participants.clone();
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .insert(id.to_string(), session);
        members
    }

    /// Record one participant's reply. False if the session is unknown.
    pub fn record_result(&self, id: &str, agent: &str, result: Value) -> bool {
        let mut sessions = self.sessions.lock().expect("collaboration sessions lock poisoned");
        match sessions.get_mut(id) {
            Some(session) => {
                session.record_result(agent, result);
                true
            }
            None => false,
        }
    }

    /// Close an active session on the replies it has: `Completed` if anyone
    /// accepted, otherwise `Failed`. Returns the resulting status.
    pub fn settle(&self, id: &str) -> Option<CollaborationStatus> {
        let mut sessions = self.sessions.lock().expect("collaboration sessions lock poisoned");
        let session = sessions.get_mut(id)?;
        if session.status.is_terminal() {
            return Some(session.status);
        }
        let accepted = session
            .results
            .values()
            .any(|reply| reply.result.get("accepted").and_then(Value::as_bool) == Some(true));
        if accepted {
            session.complete();
        } else {
            session.fail(NO_PARTICIPANT_ACCEPTED);
        }
        info!(
            collaboration_id = %id,
            status = ?session.status,
            replies = session.results.len(),
            "collaboration settled"
        );
        Some(session.status)
    }

    /// Mark a session completed. False if unknown or already terminal.
    pub fn complete(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .get_mut(id)
            .is_some_and(|session| session.complete())
    }

    /// Mark a session failed. False if unknown or already terminal.
    pub fn fail(&self, id: &str, reason: &str) -> bool {
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .get_mut(id)
            .is_some_and(|session| session.fail(reason))
    }

    pub fn summary(&self, id: &str) -> Option<CollaborationSummary> {
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .get(id)
            .map(CollaborationSession::summary)
    }

    pub fn session(&self, id: &str) -> Option<CollaborationSession> {
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("collaboration sessions lock poisoned")
            .values()
            .filter(|session| session.status == CollaborationStatus::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("collaboration sessions lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.sessions.lock().expect("collaboration sessions lock poisoned").clear();
    }
}
