//! Bounded working memory.
//!
//! When full, adding an item evicts the lowest-priority item, oldest first
//! among equals.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{json, Value};

use concerto_contracts::{
    error::OrchestraResult,
    memory::{MemoryItemPriority, WorkingMemoryItem},
};
use concerto_core::traits::WorkingMemory;

pub const DEFAULT_WORKING_CAPACITY: usize = 20;

pub struct InMemoryWorkingMemory {
    capacity: usize,
    items: Mutex<Vec<WorkingMemoryItem>>,
}

impl Default for InMemoryWorkingMemory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WORKING_CAPACITY)
    }
}

impl InMemoryWorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn items(&self) -> Vec<WorkingMemoryItem> {
        self.items.lock().expect("working memory lock poisoned").clone()
    }

    /// Items carrying `tag`, in insertion order.
    pub fn find_by_tag(&self, tag: &str) -> Vec<WorkingMemoryItem> {
        self.items
            .lock()
            .expect("working memory lock poisoned")
            .iter()
            .filter(|item| item.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.items.lock().expect("working memory lock poisoned").clear();
    }
}

fn priority_name(priority: MemoryItemPriority) -> &'static str {
    match priority {
        MemoryItemPriority::Low => "low",
        MemoryItemPriority::Medium => "medium",
        MemoryItemPriority::High => "high",
        MemoryItemPriority::Critical => "critical",
    }
}

impl WorkingMemory for InMemoryWorkingMemory {
    fn add_item(&self, item: WorkingMemoryItem) -> OrchestraResult<()> {
        let mut items = self.items.lock().expect("working memory lock poisoned");
        items.push(item);
        while items.len() > self.capacity {
            // min_by_key keeps the first minimum, which is the oldest.
            let victim = items
                .iter()
                .enumerate()
                .min_by_key(|(_, item)| item.priority)
                .map(|(index, _)| index);
            match victim {
                Some(index) => {
                    items.remove(index);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn statistics(&self) -> Value {
        let items = self.items.lock().expect("working memory lock poisoned");
        let mut priorities: BTreeMap<&str, usize> = BTreeMap::new();
        let mut tags: BTreeMap<&str, usize> = BTreeMap::new();
        for item in items.iter() {
            *priorities.entry(priority_name(item.priority)).or_default() += 1;
            for tag in &item.tags {
                *tags.entry(tag.as_str()).or_default() += 1;
            }
        }
        json!({
            "total_items": items.len(),
            "capacity": self.capacity,
            "utilization": items.len() as f64 / self.capacity as f64,
            "priority_distribution": priorities,
            "tag_distribution": tags,
        })
    }
}
