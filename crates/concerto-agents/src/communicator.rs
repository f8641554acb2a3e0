//! Typed agent-to-agent messaging over the bus.
//!
//! Each registered agent owns one `AgentCommunicator`, subscribed to
//! `agent.<name>`. Outbound requests (`task_request`, `collaboration_offer`)
//! register a one-shot rendezvous under a fresh correlation id and block
//! until the matching `*_response` arrives or the timeout elapses.
//!
//! Inbound requests never run on the bus thread. They are handed to the
//! communicator's worker pool, and when the sender asked for a reply the
//! handler's result goes back as the matching response type.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use concerto_bus::{agent_topic, MessageBus, SubscriptionId};
use concerto_contracts::{
    agent::TaskRequest,
    config::CommunicatorConfig,
    error::{OrchestraError, OrchestraResult},
    message::{AgentMessage, AgentMessageType, Message},
};
use concerto_core::{pool::panic_message, PendingResponses, WorkerPool};

/// Handles one inbound request and produces the reply payload.
pub type MessageHandler = Arc<dyn Fn(&AgentMessage) -> OrchestraResult<Value> + Send + Sync>;

/// Priority used for collaboration offers unless the caller chooses one.
pub const DEFAULT_OFFER_PRIORITY: u8 = 2;

struct CommunicatorInner {
    agent_name: String,
    bus: MessageBus,
    pending: PendingResponses,
    handlers: RwLock<HashMap<AgentMessageType, MessageHandler>>,
    pool: WorkerPool,
    task_timeout: Duration,
    collaboration_timeout: Duration,
    message_ttl_seconds: u64,
}

pub struct AgentCommunicator {
    inner: Arc<CommunicatorInner>,
    subscription: Mutex<Option<SubscriptionId>>,
    closed: AtomicBool,
}

impl AgentCommunicator {
    /// Create a communicator for `agent_name` and subscribe it to `agent.<name>`.
    pub fn new(
        agent_name: impl Into<String>,
        bus: MessageBus,
        config: &CommunicatorConfig,
        message_ttl_seconds: u64,
    ) -> Self {
        let agent_name = agent_name.into();
        let inner = Arc::new(CommunicatorInner {
            pool: WorkerPool::new(format!("agent-{}", agent_name), config.workers),
            agent_name,
            bus,
            pending: PendingResponses::new(),
            handlers: RwLock::new(HashMap::new()),
            task_timeout: config.task_timeout(),
            collaboration_timeout: config.collaboration_timeout(),
            message_ttl_seconds,
        });

        let weak: Weak<CommunicatorInner> = Arc::downgrade(&inner);
        let subscription = inner.bus.subscribe(&agent_topic(&inner.agent_name), move |message| {
            match weak.upgrade() {
                Some(inner) => inner.handle_message(message),
                None => Ok(()),
            }
        });
        debug!(agent = %inner.agent_name, "communicator attached");

        Self {
            inner,
            subscription: Mutex::new(Some(subscription)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.inner.agent_name
    }

    // ── Handlers ─────────────────────────────────────────────────────────────

    /// Handle inbound `task_request` messages. Replaces any previous handler.
    pub fn register_task_handler<F>(&self, handler: F)
    where
        F: Fn(&AgentMessage) -> OrchestraResult<Value> + Send + Sync + 'static,
    {
        self.inner.set_handler(AgentMessageType::TaskRequest, Arc::new(handler));
    }

    /// Handle inbound `collaboration_offer` messages. Replaces any previous handler.
    pub fn register_collaboration_handler<F>(&self, handler: F)
    where
        F: Fn(&AgentMessage) -> OrchestraResult<Value> + Send + Sync + 'static,
    {
        self.inner
            .set_handler(AgentMessageType::CollaborationOffer, Arc::new(handler));
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    /// Send `task` to `target` and block for its `task_response`.
    ///
    /// Returns the `response` field of the reply. `timeout` defaults to the
    /// configured task timeout.
    pub fn send_task_request(
        &self,
        target: &str,
        task: &TaskRequest,
        priority: u8,
        timeout: Option<Duration>,
    ) -> OrchestraResult<Value> {
        let correlation_id = self.inner.correlation_id("task");
        let request = AgentMessage {
            sender: self.inner.agent_name.clone(),
            receiver: target.to_string(),
            message_type: AgentMessageType::TaskRequest,
            payload: json!({ "task": task.to_value() }),
            correlation_id: correlation_id.clone(),
            priority,
            requires_response: true,
            collaboration_context: None,
        };
        let timeout = timeout.unwrap_or(self.inner.task_timeout);

        match self.inner.request(request, timeout)? {
            Some(response) => Ok(response),
            None => {
                warn!(
                    agent = %self.inner.agent_name,
                    target = %target,
                    correlation_id = %correlation_id,
                    "task request timed out"
                );
                Err(OrchestraError::TaskTimeout {
                    target: target.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Reply to a `task_request` this agent received.
    pub fn send_task_response(&self, original: &AgentMessage, response: Value) {
        self.inner.send_task_response(original, response);
    }

    /// Announce `status` to every `broadcast.status_update` subscriber.
    pub fn broadcast_status_update(&self, status: Value) {
        let update = AgentMessage {
            sender: self.inner.agent_name.clone(),
            receiver: String::new(),
            message_type: AgentMessageType::StatusUpdate,
            payload: json!({ "status": status }),
            correlation_id: self.inner.correlation_id("status"),
            priority: 1,
            requires_response: false,
            collaboration_context: None,
        };
        self.inner.publish(&update);
    }

    /// Offer a collaboration to `target` and block for its answer.
    ///
    /// A timeout is not an error: the answer is `{accepted: false, reason: "timeout"}`.
    pub fn offer_collaboration(
        &self,
        target: &str,
        collaboration_type: &str,
        context: &Map<String, Value>,
        priority: u8,
    ) -> OrchestraResult<Value> {
        let offer = AgentMessage {
            sender: self.inner.agent_name.clone(),
            receiver: target.to_string(),
            message_type: AgentMessageType::CollaborationOffer,
            payload: json!({ "collaboration_type": collaboration_type, "context": context }),
            correlation_id: self.inner.correlation_id("collab"),
            priority,
            requires_response: true,
            collaboration_context: Some(Value::Object(context.clone())),
        };

        match self.inner.request(offer, self.inner.collaboration_timeout)? {
            Some(answer) => Ok(answer),
            None => {
                warn!(
                    agent = %self.inner.agent_name,
                    target = %target,
                    collaboration_type = %collaboration_type,
                    "collaboration offer timed out"
                );
                Ok(json!({ "accepted": false, "reason": "timeout" }))
            }
        }
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Detach from the bus, drop pending requests and stop the worker pool.
    ///
    /// Idempotent. Waiting requesters see their request time out immediately.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = self
            .subscription
            .lock()
            .expect("communicator subscription lock poisoned")
            .take();
        if let Some(subscription) = subscription {
            self.inner.bus.unsubscribe(&subscription);
        }
        self.inner.pending.clear();
        self.inner.pool.shutdown();
        info!(agent = %self.inner.agent_name, "communicator released");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for AgentCommunicator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl CommunicatorInner {
    fn correlation_id(&self, purpose: &str) -> String {
        format!("{}_{}_{}", self.agent_name, purpose, uuid::Uuid::new_v4().simple())
    }

    fn set_handler(&self, message_type: AgentMessageType, handler: MessageHandler) {
        self.handlers
            .write()
            .expect("communicator handler lock poisoned")
            .insert(message_type, handler);
    }

    fn handler(&self, message_type: AgentMessageType) -> Option<MessageHandler> {
        self.handlers
            .read()
            .expect("communicator handler lock poisoned")
            .get(&message_type)
            .cloned()
    }

    fn publish(&self, message: &AgentMessage) {
        self.bus
            .publish(message.to_message().with_ttl(self.message_ttl_seconds));
    }

    /// Publish `message` and wait for its response. `None` on timeout.
    ///
    /// The pending entry is gone when this returns, whatever the outcome.
    fn request(&self, message: AgentMessage, timeout: Duration) -> OrchestraResult<Option<Value>> {
        let correlation_id = message.correlation_id.clone();
        let waiter = self.pending.register(&correlation_id)?;
        debug!(
            agent = %self.agent_name,
            target = %message.receiver,
            correlation_id = %correlation_id,
            message_type = ?message.message_type,
            "sending request"
        );
        self.publish(&message);
        let answer = waiter.wait(timeout);
        self.pending.discard(&correlation_id);
        Ok(answer)
    }

    fn send_task_response(&self, original: &AgentMessage, response: Value) {
        let reply = AgentMessage {
            sender: self.agent_name.clone(),
            receiver: original.sender.clone(),
            message_type: AgentMessageType::TaskResponse,
            payload: json!({ "response": response, "original_task": original.payload }),
            correlation_id: original.correlation_id.clone(),
            priority: original.priority,
            requires_response: false,
            collaboration_context: None,
        };
        self.publish(&reply);
    }

    fn send_collaboration_response(&self, original: &AgentMessage, answer: Value) {
        let reply = AgentMessage {
            sender: self.agent_name.clone(),
            receiver: original.sender.clone(),
            message_type: AgentMessageType::CollaborationResponse,
            payload: answer,
            correlation_id: original.correlation_id.clone(),
            priority: original.priority,
            requires_response: false,
            collaboration_context: None,
        };
        self.publish(&reply);
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Bus callback for `agent.<name>`. Runs on the bus thread, so it never blocks.
    fn handle_message(self: &Arc<Self>, message: &Message) -> OrchestraResult<()> {
        let Some(incoming) = AgentMessage::from_message(message) else {
            debug!(agent = %self.agent_name, kind = %message.kind, "ignoring non-agent message");
            return Ok(());
        };

        if incoming.message_type == AgentMessageType::TaskResponse {
            let response = incoming.payload.get("response").cloned().unwrap_or_else(|| json!({}));
            if !self.pending.resolve(&incoming.correlation_id, response) {
                debug!(
                    agent = %self.agent_name,
                    correlation_id = %incoming.correlation_id,
                    "task response with no pending request"
                );
            }
            return Ok(());
        }

        if message.kind.is_response() && self.pending.contains(&incoming.correlation_id) {
            self.pending.resolve(&incoming.correlation_id, incoming.payload);
            return Ok(());
        }

        let Some(handler) = self.handler(incoming.message_type) else {
            debug!(
                agent = %self.agent_name,
                message_type = ?incoming.message_type,
                correlation_id = %incoming.correlation_id,
                "no handler registered; dropping message"
            );
            return Ok(());
        };

        let inner = Arc::clone(self);
        // The handle is not joined; replies travel back over the bus.
        let _ = self.pool.submit(move || inner.process_request(incoming, handler));
        Ok(())
    }

    fn process_request(&self, request: AgentMessage, handler: MessageHandler) {
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(
                    agent = %self.agent_name,
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "request handler failed"
                );
                json!({ "error": e.to_string(), "success": false })
            }
            Err(payload) => {
                let message = panic_message(payload);
                error!(
                    agent = %self.agent_name,
                    correlation_id = %request.correlation_id,
                    panic = %message,
                    "request handler panicked"
                );
                json!({ "error": message, "success": false })
            }
        };

        if !request.requires_response {
            return;
        }
        match request.message_type.response_type() {
            Some(AgentMessageType::TaskResponse) => self.send_task_response(&request, reply),
            Some(AgentMessageType::CollaborationResponse) => self.send_collaboration_response(&request, reply),
            _ => debug!(
                agent = %self.agent_name,
                message_type = ?request.message_type,
                "message type has no response form"
            ),
        }
    }
}
