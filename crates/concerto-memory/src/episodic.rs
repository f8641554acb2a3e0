//! Bounded log of task attempts.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::{json, Value};

use concerto_contracts::{error::OrchestraResult, memory::Experience};
use concerto_core::traits::EpisodicMemory;

/// Default number of experiences kept before the oldest are dropped.
pub const DEFAULT_MAX_EXPERIENCES: usize = 10_000;

/// Key in `performance_metrics` holding the attempt's wall time in seconds.
pub const EXECUTION_TIME_METRIC: &str = "execution_time";

pub struct InMemoryEpisodicMemory {
    max_entries: usize,
    experiences: Mutex<Vec<Experience>>,
}

impl Default for InMemoryEpisodicMemory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_EXPERIENCES)
    }
}

impl InMemoryEpisodicMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            experiences: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.experiences.lock().expect("episodic memory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent first, optionally limited to one agent.
    pub fn recent(&self, agent_name: Option<&str>, limit: usize) -> Vec<Experience> {
        let experiences = self.experiences.lock().expect("episodic memory lock poisoned");
        experiences
            .iter()
            .rev()
            .filter(|e| agent_name.map_or(true, |a| e.agent_name == a))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Successful attempts whose task text contains `pattern` (case-insensitive).
    pub fn successful(&self, pattern: Option<&str>, limit: usize) -> Vec<Experience> {
        let pattern = pattern.map(str::to_lowercase);
        let experiences = self.experiences.lock().expect("episodic memory lock poisoned");
        experiences
            .iter()
            .rev()
            .filter(|e| e.success)
            .filter(|e| {
                pattern
                    .as_deref()
                    .map_or(true, |p| e.task.to_lowercase().contains(p))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Success rate, average duration and task-type distribution.
    pub fn performance_stats(&self, agent_name: Option<&str>, task_type: Option<&str>) -> Value {
        let experiences = self.experiences.lock().expect("episodic memory lock poisoned");
        let selected: Vec<&Experience> = experiences
            .iter()
            .filter(|e| agent_name.map_or(true, |a| e.agent_name == a))
            .filter(|e| task_type.map_or(true, |t| e.task_type == t))
            .collect();

        if selected.is_empty() {
            return json!({
                "total_experiences": 0,
                "success_rate": 0.0,
                "avg_execution_time": 0.0,
                "task_types": {},
            });
        }

        let successes = selected.iter().filter(|e| e.success).count();
        let times: Vec<f64> = selected
            .iter()
            .filter_map(|e| e.performance_metrics.get(EXECUTION_TIME_METRIC))
            .filter_map(Value::as_f64)
            .collect();
        let avg_time = if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        };
        let mut task_types: BTreeMap<&str, usize> = BTreeMap::new();
        for e in &selected {
            *task_types.entry(e.task_type.as_str()).or_default() += 1;
        }

        json!({
            "total_experiences": selected.len(),
            "success_rate": successes as f64 / selected.len() as f64,
            "avg_execution_time": avg_time,
            "task_types": task_types,
        })
    }
}

impl EpisodicMemory for InMemoryEpisodicMemory {
    fn store_experience(&self, experience: &Experience) -> OrchestraResult<()> {
        let mut experiences = self.experiences.lock().expect("episodic memory lock poisoned");
        experiences.push(experience.clone());
        if experiences.len() > self.max_entries {
            let excess = experiences.len() - self.max_entries;
            experiences.drain(..excess);
        }
        Ok(())
    }

    fn statistics(&self) -> Value {
        self.performance_stats(None, None)
    }
}
