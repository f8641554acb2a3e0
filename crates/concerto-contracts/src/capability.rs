//! Agent capability sets.
//!
//! Capabilities are plain names ("code_review", "summarize") an agent
//! advertises at registration. The orchestrator uses them for discovery and
//! publishes them to the knowledge graph as `can_do` facts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The set of capabilities an agent advertises.
///
/// Ordered so that listings and serialized records are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    inner: BTreeSet<String>,
}

impl CapabilitySet {
    /// Add a capability. Adding the same name twice is a no-op.
    pub fn grant(&mut self, capability: impl Into<String>) {
        self.inner.insert(capability.into());
    }

    pub fn has(&self, capability: &str) -> bool {
        self.inner.contains(capability)
    }

    /// Iterate over capability names in sorted order.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CapabilitySet::default();
        for capability in iter {
            set.grant(capability);
        }
        set
    }
}
