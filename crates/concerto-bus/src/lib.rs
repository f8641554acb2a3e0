//! # concerto-bus
//!
//! In-process publish/subscribe transport with priorities, TTLs and
//! correlated request/response.
//!
//! Every component talks through a shared `MessageBus` handle. Agents listen
//! on `agent.<name>`; receiver-less messages fan out on `broadcast.<kind>`.

pub mod bus;
mod queue;
pub mod subscribers;

pub use bus::{agent_topic, broadcast_topic, BusStats, MessageBus};
pub use subscribers::{Subscriber, SubscriptionId};
