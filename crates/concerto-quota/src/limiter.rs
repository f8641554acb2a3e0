//! Sliding-window rate limiter.
//!
//! Evaluation:
//!
//! 1. Find the first rule matching `(entity, action)`. None → allow.
//! 2. Drop usage older than the rule's window for that `(entity, action)`.
//! 3. Deny if one more request would exceed `max_requests`, or if `cost`
//!    would push the window's total past `max_cost`.
//! 4. Otherwise record the request and allow.
//!
//! A denied request is not recorded, so it does not count against the window.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use concerto_contracts::error::{OrchestraError, OrchestraResult};
use concerto_core::traits::{QuotaDecision, RateLimiter};

use crate::rule::{QuotaConfig, QuotaRule};

/// Usage recorded inside one rule's window for one `(entity, action)`.
#[derive(Default)]
struct Window {
    entries: VecDeque<(Instant, f64)>,
}

impl Window {
    fn prune(&mut self, now: Instant, width: Duration) {
        while let Some((at, _)) = self.entries.front() {
            if now.duration_since(*at) >= width {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn total_cost(&self) -> f64 {
        self.entries.iter().map(|(_, cost)| cost).sum()
    }
}

/// Current usage of an `(entity, action)` pair under its matching rule.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaUsage {
    pub rule_id: String,
    pub requests: usize,
    pub cost: f64,
}

/// A budget threshold crossing.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetAlert {
    pub rule_id: String,
    pub entity: String,
    pub message: String,
}

type WindowKey = (String, String, String);

/// A `RateLimiter` driven by TOML quota rules.
#[derive(Default)]
pub struct WindowedRateLimiter {
    config: QuotaConfig,
    windows: Mutex<HashMap<WindowKey, Window>>,
    alerts: Mutex<Vec<BudgetAlert>>,
}

impl WindowedRateLimiter {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// A limiter with no rules; every request is allowed.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Returns `ConfigError` if the TOML is malformed or a rule is unusable.
    pub fn from_toml_str(s: &str) -> OrchestraResult<Self> {
        let config: QuotaConfig = toml::from_str(s).map_err(|e| OrchestraError::ConfigError {
            reason: format!("failed to parse quota TOML: {}", e),
        })?;
        for rule in &config.quotas {
            if rule.window_seconds == 0 {
                return Err(OrchestraError::ConfigError {
                    reason: format!("quota rule '{}' has a zero-length window", rule.id),
                });
            }
        }
        Ok(Self::new(config))
    }

    pub fn from_file(path: &Path) -> OrchestraResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| OrchestraError::ConfigError {
            reason: format!("failed to read quota file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn rules(&self) -> &[QuotaRule] {
        &self.config.quotas
    }

    fn matching_rule(&self, entity: &str, action: &str) -> Option<&QuotaRule> {
        self.config.quotas.iter().find(|rule| rule.matches(entity, action))
    }

    /// Usage inside the current window, or `None` when no rule applies.
    pub fn usage(&self, entity: &str, action: &str) -> Option<QuotaUsage> {
        let rule = self.matching_rule(entity, action)?;
        let key = (rule.id.clone(), entity.to_string(), action.to_string());
        let mut windows = self.windows.lock().expect("quota window lock poisoned");
        let window = windows.entry(key).or_default();
        window.prune(Instant::now(), Duration::from_secs(rule.window_seconds));
        Some(QuotaUsage {
            rule_id: rule.id.clone(),
            requests: window.entries.len(),
            cost: window.total_cost(),
        })
    }

    /// Budget alerts raised so far, oldest first.
    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.lock().expect("quota alert lock poisoned").clone()
    }

    /// Forget all recorded usage and alerts.
    pub fn reset(&self) {
        self.windows.lock().expect("quota window lock poisoned").clear();
        self.alerts.lock().expect("quota alert lock poisoned").clear();
    }

    fn raise_alert(&self, rule: &QuotaRule, entity: &str, used: f64, budget: f64) {
        let message = format!(
            "budget alert: {:.1}% of cost budget used ({} / {})",
            used / budget * 100.0,
            used,
            budget
        );
        warn!(rule_id = %rule.id, entity = %entity, used, budget, "quota budget threshold crossed");
        self.alerts
            .lock()
            .expect("quota alert lock poisoned")
            .push(BudgetAlert {
                rule_id: rule.id.clone(),
                entity: entity.to_string(),
                message,
            });
    }
}

impl RateLimiter for WindowedRateLimiter {
    fn acquire(&self, entity: &str, action: &str, cost: f64) -> QuotaDecision {
        let Some(rule) = self.matching_rule(entity, action) else {
            debug!(entity = %entity, action = %action, "no quota rule matched; allowing");
            return QuotaDecision::allow();
        };

        let now = Instant::now();
        let key = (rule.id.clone(), entity.to_string(), action.to_string());
        let mut windows = self.windows.lock().expect("quota window lock poisoned");
        let window = windows.entry(key).or_default();
        window.prune(now, Duration::from_secs(rule.window_seconds));

        if let Some(max_requests) = rule.max_requests {
            if window.entries.len() >= max_requests as usize {
                warn!(rule_id = %rule.id, entity = %entity, action = %action, "request limit reached");
                return QuotaDecision::deny(format!(
                    "rate limit: {} requests per {}s reached (rule '{}')",
                    max_requests, rule.window_seconds, rule.id
                ));
            }
        }

        let used = window.total_cost();
        if let Some(max_cost) = rule.max_cost {
            if used + cost > max_cost {
                warn!(rule_id = %rule.id, entity = %entity, action = %action, cost, used, "cost budget exhausted");
                return QuotaDecision::deny(format!(
                    "cost budget exceeded: {} + {} > {} per {}s (rule '{}')",
                    used, cost, max_cost, rule.window_seconds, rule.id
                ));
            }
        }

        window.entries.push_back((now, cost));
        drop(windows);

        if let (Some(max_cost), Some(threshold)) = (rule.max_cost, rule.alert_threshold) {
            let budget_line = max_cost * threshold;
            if used < budget_line && used + cost >= budget_line {
                self.raise_alert(rule, entity, used + cost, max_cost);
            }
        }

        QuotaDecision::allow()
    }
}
