//! The message bus.
//!
//! Publishers push onto a priority queue; a single dispatch worker pops the
//! highest-priority message and routes it:
//!
//! | kind        | destination                                  |
//! |-------------|----------------------------------------------|
//! | `broadcast` | subscribers of `broadcast.broadcast`         |
//! | `response`  | the pending `send_request` with its id       |
//! | otherwise   | `agent.<receiver>`, or `broadcast.<kind>`     |
//!
//! Expired messages are dropped both at publish and at dequeue, so no
//! subscriber ever sees one.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use concerto_contracts::{
    config::BusConfig,
    error::{OrchestraError, OrchestraResult},
    message::{Message, MessageKind},
};
use concerto_core::{pool::panic_message, PendingResponses};

use crate::queue::MessageQueue;
use crate::subscribers::{Subscriber, SubscriberTable, SubscriptionId};

/// Topic an agent listens on for directly addressed messages.
pub fn agent_topic(agent: &str) -> String {
    format!("agent.{}", agent)
}

/// Topic receiver-less messages of `kind` are delivered to.
pub fn broadcast_topic(kind: MessageKind) -> String {
    format!("broadcast.{}", kind)
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_expired: u64,
    pub subscribers_count: usize,
    pub pending_requests: usize,
    pub queue_depth: usize,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    expired: AtomicU64,
}

struct BusInner {
    subscribers: SubscriberTable,
    queue: MessageQueue,
    pending: PendingResponses,
    counters: Counters,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: SubscriberTable::default(),
                queue: MessageQueue::new(),
                pending: PendingResponses::new(),
                counters: Counters::default(),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
                poll_interval: config.poll_interval().max(Duration::from_millis(1)),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawn the dispatch worker. Calling it on a running bus does nothing.
    pub fn start(&self) -> OrchestraResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("concerto-bus".to_string())
            .spawn(move || dispatch_loop(inner))
            .map_err(|e| {
                self.inner.running.store(false, Ordering::SeqCst);
                OrchestraError::HandlerFailed {
                    reason: format!("failed to spawn bus worker: {}", e),
                }
            })?;
        *self.inner.worker.lock().expect("bus worker lock poisoned") = Some(handle);
        info!("message bus started");
        Ok(())
    }

    /// Stop and join the dispatch worker. Messages still queued stay queued.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.queue.wake_all();
        let handle = self.inner.worker.lock().expect("bus worker lock poisoned").take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("bus worker panicked outside a callback");
            }
        }
        info!("message bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) -> OrchestraResult<()> + Send + Sync + 'static,
    {
        let callback: Subscriber = Arc::new(callback);
        let id = self.inner.subscribers.add(topic, callback);
        debug!(topic = %topic, subscription = %id, "subscribed");
        id
    }

    /// Remove a subscription. Returns false if it was not present.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.inner.subscribers.remove(id);
        if removed {
            debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Queue `message` for delivery. Messages already past their TTL are dropped.
    pub fn publish(&self, message: Message) {
        if message.is_expired() {
            self.inner.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %message.correlation_id,
                kind = %message.kind,
                "dropping expired message at publish"
            );
            return;
        }
        self.inner.counters.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %message.correlation_id,
            kind = %message.kind,
            priority = message.priority,
            "message published"
        );
        self.inner.queue.push(message);
    }

    /// Publish a `request` and block until its `response` arrives.
    ///
    /// The pending entry is removed on every outcome.
    pub fn send_request(&self, message: Message, timeout: Duration) -> OrchestraResult<Value> {
        if message.kind != MessageKind::Request {
            return Err(OrchestraError::InvalidMessage {
                reason: format!("send_request needs a 'request' message, got '{}'", message.kind),
            });
        }
        let correlation_id = message.correlation_id.clone();
        let target = message.receiver.clone().unwrap_or_else(|| "broadcast".to_string());
        let waiter = self.inner.pending.register(&correlation_id)?;

        self.publish(message);

        match waiter.wait(timeout) {
            Some(payload) => Ok(payload),
            None => {
                self.inner.pending.discard(&correlation_id);
                warn!(
                    correlation_id = %correlation_id,
                    target = %target,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(OrchestraError::TaskTimeout {
                    target,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Answer a `request` received from this bus.
    pub fn respond(&self, request: &Message, responder: &str, payload: Value) {
        let response = Message::new(MessageKind::Response, responder, payload)
            .to(request.sender.clone())
            .with_correlation_id(request.correlation_id.clone())
            .with_priority(request.priority);
        self.publish(response);
    }

    /// Drop pending requests registered more than `max_age` ago.
    pub fn clear_stale_requests(&self, max_age: Duration) -> usize {
        let cleared = self.inner.pending.purge_older_than(max_age);
        if cleared > 0 {
            info!(cleared, "cleared stale pending requests");
        }
        cleared
    }

    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        BusStats {
            messages_sent: counters.sent.load(Ordering::Relaxed),
            messages_received: counters.received.load(Ordering::Relaxed),
            messages_expired: counters.expired.load(Ordering::Relaxed),
            subscribers_count: self.inner.subscribers.count(),
            pending_requests: self.inner.pending.len(),
            queue_depth: self.inner.queue.len(),
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

fn dispatch_loop(inner: Arc<BusInner>) {
    while inner.running.load(Ordering::SeqCst) {
        if let Some(message) = inner.queue.pop_timeout(inner.poll_interval) {
            inner.dispatch(&message);
        }
    }
    debug!("bus dispatch loop exited");
}

impl BusInner {
    fn dispatch(&self, message: &Message) {
        if message.is_expired() {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %message.correlation_id, "dropping expired message at dequeue");
            return;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match (message.kind, message.receiver.as_deref()) {
            (MessageKind::Broadcast, _) => self.deliver(&broadcast_topic(message.kind), message),
            (MessageKind::Response, _) => {
                if !self.pending.resolve(&message.correlation_id, message.payload.clone()) {
                    debug!(
                        correlation_id = %message.correlation_id,
                        "no pending request for response"
                    );
                }
            }
            (_, Some(receiver)) => self.deliver(&agent_topic(receiver), message),
            (kind, None) => self.deliver(&broadcast_topic(kind), message),
        }
    }

    fn deliver(&self, topic: &str, message: &Message) {
        let subscribers = self.subscribers.snapshot(topic);
        if subscribers.is_empty() {
            debug!(topic = %topic, correlation_id = %message.correlation_id, "no subscribers");
            return;
        }
        for (id, callback) in subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    topic = %topic,
                    subscription = %id,
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "subscriber callback failed"
                ),
                Err(payload) => error!(
                    topic = %topic,
                    subscription = %id,
                    correlation_id = %message.correlation_id,
                    panic = %panic_message(payload),
                    "subscriber callback panicked"
                ),
            }
        }
    }
}
