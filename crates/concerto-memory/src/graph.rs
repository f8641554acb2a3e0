//! Subject/predicate/object knowledge graph.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use concerto_contracts::error::OrchestraResult;
use concerto_core::traits::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source: String,
    pub added_at: DateTime<Utc>,
}

impl Triple {
    fn same_fact(&self, subject: &str, predicate: &str, object: &str) -> bool {
        self.subject == subject && self.predicate == predicate && self.object == object
    }
}

/// Deduplicated triple store. Re-adding a known fact keeps the first record.
#[derive(Default)]
pub struct InMemoryKnowledgeGraph {
    triples: Mutex<Vec<Triple>>,
}

impl InMemoryKnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact. Returns false when it was already known.
    pub fn insert(&self, subject: &str, predicate: &str, object: &str, source: &str) -> bool {
        let mut triples = self.triples.lock().expect("knowledge graph lock poisoned");
        if triples.iter().any(|t| t.same_fact(subject, predicate, object)) {
            return false;
        }
        triples.push(Triple {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            source: source.to_string(),
            added_at: Utc::now(),
        });
        true
    }

    /// Triples matching every given component. `None` matches anything.
    pub fn find(&self, subject: Option<&str>, predicate: Option<&str>, object: Option<&str>) -> Vec<Triple> {
        self.triples
            .lock()
            .expect("knowledge graph lock poisoned")
            .iter()
            .filter(|t| subject.map_or(true, |s| t.subject == s))
            .filter(|t| predicate.map_or(true, |p| t.predicate == p))
            .filter(|t| object.map_or(true, |o| t.object == o))
            .cloned()
            .collect()
    }

    /// Objects of every `(subject, predicate, _)` fact, in insertion order.
    pub fn objects(&self, subject: &str, predicate: &str) -> Vec<String> {
        self.find(Some(subject), Some(predicate), None)
            .into_iter()
            .map(|t| t.object)
            .collect()
    }

    /// Subjects of every `(_, predicate, object)` fact, in insertion order.
    pub fn subjects(&self, predicate: &str, object: &str) -> Vec<String> {
        self.find(None, Some(predicate), Some(object))
            .into_iter()
            .map(|t| t.subject)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.triples.lock().expect("knowledge graph lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KnowledgeGraph for InMemoryKnowledgeGraph {
    fn add_triple(&self, subject: &str, predicate: &str, object: &str, source: &str) -> OrchestraResult<()> {
        if !self.insert(subject, predicate, object, source) {
            debug!(subject = %subject, predicate = %predicate, object = %object, "triple already known");
        }
        Ok(())
    }

    fn statistics(&self) -> Value {
        let triples = self.triples.lock().expect("knowledge graph lock poisoned");
        let subjects: BTreeSet<&str> = triples.iter().map(|t| t.subject.as_str()).collect();
        let predicates: BTreeSet<&str> = triples.iter().map(|t| t.predicate.as_str()).collect();
        let objects: BTreeSet<&str> = triples.iter().map(|t| t.object.as_str()).collect();
        json!({
            "total_triples": triples.len(),
            "unique_subjects": subjects.len(),
            "unique_predicates": predicates.len(),
            "unique_objects": objects.len(),
        })
    }
}
