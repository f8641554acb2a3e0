//! Topic → subscriber table.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use concerto_contracts::{error::OrchestraResult, message::Message};

/// A subscriber callback. Errors are logged by the bus and never propagate.
pub type Subscriber = Arc<dyn Fn(&Message) -> OrchestraResult<()> + Send + Sync>;

/// Opaque handle returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    fn new(topic: &str) -> Self {
        Self(format!("{}#{}", topic, uuid::Uuid::new_v4().simple()))
    }

    /// The topic this subscription was taken out on.
    pub fn topic(&self) -> &str {
        self.0.rsplit_once('#').map(|(topic, _)| topic).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
pub(crate) struct SubscriberTable {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, Subscriber)>>>,
}

impl SubscriberTable {
    pub(crate) fn add(&self, topic: &str, callback: Subscriber) -> SubscriptionId {
        let id = SubscriptionId::new(topic);
        self.topics
            .write()
            .expect("subscriber table lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push((id.clone(), callback));
        id
    }

    pub(crate) fn remove(&self, id: &SubscriptionId) -> bool {
        let mut topics = self.topics.write().expect("subscriber table lock poisoned");
        let Some(subscribers) = topics.get_mut(id.topic()) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| sid != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.remove(id.topic());
        }
        removed
    }

    /// Snapshot of the callbacks on `topic`, so none run under the table lock.
    pub(crate) fn snapshot(&self, topic: &str) -> Vec<(SubscriptionId, Subscriber)> {
        self.topics
            .read()
            .expect("subscriber table lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self) -> usize {
        self.topics
            .read()
            .expect("subscriber table lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }
}
