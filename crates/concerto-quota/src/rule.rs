//! Quota rule types and configuration schema.
//!
//! A `QuotaConfig` is deserialized from TOML and holds an ordered list of
//! `QuotaRule`s. The first rule matching a request's entity and action
//! applies; a request no rule matches is allowed.

use serde::{Deserialize, Serialize};

fn default_window_seconds() -> u64 {
    60
}

/// One quota, bounding requests and cost over a sliding window.
///
/// Example in TOML:
/// ```toml
/// [[quotas]]
/// id = "step-budget"
/// entity = "*"
/// action = "step_exec"
/// max_requests = 100
/// window_seconds = 60
/// max_cost = 50000.0
/// alert_threshold = 0.8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRule {
    /// Stable identifier used in denial reasons and logs.
    pub id: String,

    /// Entity pattern (workflow id, agent name, user). `"*"` matches any.
    pub entity: String,

    /// Action pattern. `"*"` matches any.
    pub action: String,

    /// Requests allowed per window. Absent means unbounded.
    #[serde(default)]
    pub max_requests: Option<u32>,

    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Total cost allowed per window. Absent means unbounded.
    #[serde(default)]
    pub max_cost: Option<f64>,

    /// Fraction of `max_cost` at which a budget alert is raised.
    #[serde(default)]
    pub alert_threshold: Option<f64>,
}

impl QuotaRule {
    /// Wildcard `"*"` matches anything; otherwise exact, case-sensitive.
    pub fn matches(&self, entity: &str, action: &str) -> bool {
        let entity_matches = self.entity == "*" || self.entity == entity;
        let action_matches = self.action == "*" || self.action == action;
        entity_matches && action_matches
    }
}

/// The top-level structure deserialized from a quota TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Ordered list of rules. First match wins.
    #[serde(default)]
    pub quotas: Vec<QuotaRule>,
}
