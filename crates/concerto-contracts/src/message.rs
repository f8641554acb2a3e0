//! Bus messages and the typed agent envelope carried over them.
//!
//! `Message` is what the bus queues and routes. `AgentMessage` is the typed
//! view agents work with; the two convert one-to-one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Lowest accepted message priority.
pub const MIN_PRIORITY: u8 = 1;
/// Highest accepted message priority.
pub const MAX_PRIORITY: u8 = 5;
/// Time-to-live applied when a message does not set one.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// The closed set of message kinds the bus understands.
///
/// Only `Broadcast` and `Response` have dedicated routing; every other kind
/// is delivered directly to `agent.<receiver>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Broadcast,
    TaskRequest,
    TaskResponse,
    StatusUpdate,
    CollaborationOffer,
    CollaborationResponse,
}

impl MessageKind {
    /// The wire name of this kind, also used to build topic names.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
            MessageKind::Broadcast => "broadcast",
            MessageKind::TaskRequest => "task_request",
            MessageKind::TaskResponse => "task_response",
            MessageKind::StatusUpdate => "status_update",
            MessageKind::CollaborationOffer => "collaboration_offer",
            MessageKind::CollaborationResponse => "collaboration_response",
        }
    }

    /// True for kinds whose name ends in `_response` (plus plain `response`).
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::Response | MessageKind::TaskResponse | MessageKind::CollaborationResponse
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message travelling through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: String,
    /// `None` means broadcast.
    pub receiver: Option<String>,
    pub payload: Value,
    pub correlation_id: String,
    /// 1 (low) to 5 (high).
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl Message {
    /// Build a message with a fresh correlation id, priority 1 and the default TTL.
    pub fn new(kind: MessageKind, sender: impl Into<String>, payload: Value) -> Self {
        let sender = sender.into();
        let correlation_id = format!("{}_{}", sender, uuid::Uuid::new_v4().simple());
        Self {
            kind,
            sender,
            receiver: None,
            payload,
            correlation_id,
            priority: MIN_PRIORITY,
            created_at: Utc::now(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the priority, clamped into `1..=5`.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// A message is expired once its age reaches its TTL, so `ttl = 0` is
    /// expired from the moment it is created.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        now.signed_duration_since(self.created_at).num_milliseconds() >= ttl_ms
    }
}

/// The agent-level message types carried in an `AgentMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMessageType {
    TaskRequest,
    TaskResponse,
    StatusUpdate,
    CollaborationOffer,
    CollaborationResponse,
}

impl AgentMessageType {
    pub fn kind(&self) -> MessageKind {
        match self {
            AgentMessageType::TaskRequest => MessageKind::TaskRequest,
            AgentMessageType::TaskResponse => MessageKind::TaskResponse,
            AgentMessageType::StatusUpdate => MessageKind::StatusUpdate,
            AgentMessageType::CollaborationOffer => MessageKind::CollaborationOffer,
            AgentMessageType::CollaborationResponse => MessageKind::CollaborationResponse,
        }
    }

    /// Map a bus kind back to an agent message type, if it is one.
    pub fn from_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::TaskRequest => Some(AgentMessageType::TaskRequest),
            MessageKind::TaskResponse => Some(AgentMessageType::TaskResponse),
            MessageKind::StatusUpdate => Some(AgentMessageType::StatusUpdate),
            MessageKind::CollaborationOffer => Some(AgentMessageType::CollaborationOffer),
            MessageKind::CollaborationResponse => Some(AgentMessageType::CollaborationResponse),
            MessageKind::Request
            | MessageKind::Response
            | MessageKind::Notification
            | MessageKind::Broadcast => None,
        }
    }

    /// The reply type for a request-like message, if any.
    pub fn response_type(&self) -> Option<Self> {
        match self {
            AgentMessageType::TaskRequest => Some(AgentMessageType::TaskResponse),
            AgentMessageType::CollaborationOffer => Some(AgentMessageType::CollaborationResponse),
            AgentMessageType::TaskResponse
            | AgentMessageType::StatusUpdate
            | AgentMessageType::CollaborationResponse => None,
        }
    }
}

/// Typed envelope agents exchange over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: String,
    /// Empty string means broadcast.
    pub receiver: String,
    pub message_type: AgentMessageType,
    pub payload: Value,
    pub correlation_id: String,
    pub priority: u8,
    pub requires_response: bool,
    pub collaboration_context: Option<Value>,
}

impl AgentMessage {
    /// Wrap this envelope as a bus message.
    ///
    /// The bus payload is `{data, collaboration_context, requires_response}`.
    pub fn to_message(&self) -> Message {
        let payload = json!({
            "data": self.payload,
            "collaboration_context": self.collaboration_context,
            "requires_response": self.requires_response,
        });
        let message = Message::new(self.message_type.kind(), self.sender.clone(), payload)
            .with_correlation_id(self.correlation_id.clone())
            .with_priority(self.priority);
        if self.receiver.is_empty() {
            message
        } else {
            message.to(self.receiver.clone())
        }
    }

    /// Unwrap a bus message. Returns `None` for kinds that are not agent messages.
    pub fn from_message(message: &Message) -> Option<Self> {
        let message_type = AgentMessageType::from_kind(message.kind)?;
        let payload = &message.payload;
        Some(Self {
            sender: message.sender.clone(),
            receiver: message.receiver.clone().unwrap_or_default(),
            message_type,
            payload: payload.get("data").cloned().unwrap_or_else(|| json!({})),
            correlation_id: message.correlation_id.clone(),
            priority: message.priority,
            requires_response: payload
                .get("requires_response")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            collaboration_context: payload
                .get("collaboration_context")
                .filter(|v| !v.is_null())
                .cloned(),
        })
    }
}
