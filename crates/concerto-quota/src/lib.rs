//! # concerto-quota
//!
//! A TOML-driven sliding-window rate limiter implementing
//! [`RateLimiter`](concerto_core::traits::RateLimiter).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use concerto_quota::WindowedRateLimiter;
//!
//! let limiter = WindowedRateLimiter::from_toml_str(r#"
//!     [[quotas]]
//!     id = "steps"
//!     entity = "*"
//!     action = "step_exec"
//!     max_requests = 100
//!     window_seconds = 60
//! "#)?;
//! ```
//!
//! ## Rule matching
//!
//! Each rule names an `entity` and `action` pattern; `"*"` matches any
//! value. Rules apply in declaration order and the first match wins. Usage
//! is tracked separately for every concrete `(entity, action)` pair, so a
//! wildcard rule gives each entity its own window. Requests no rule matches
//! are allowed.

pub mod limiter;
pub mod rule;

pub use limiter::{BudgetAlert, QuotaUsage, WindowedRateLimiter};
pub use rule::{QuotaConfig, QuotaRule};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use concerto_contracts::error::OrchestraError;
    use concerto_core::traits::RateLimiter;

    use crate::WindowedRateLimiter;

    // ── 1. allow by default ───────────────────────────────────────────────────

    #[test]
    fn no_rules_allows_everything() {
        let limiter = WindowedRateLimiter::from_toml_str("").unwrap();
        for _ in 0..100 {
            assert!(limiter.acquire("wf-1", "step_exec", 1e9).allowed);
        }
        assert!(limiter.usage("wf-1", "step_exec").is_none());
    }

    // ── 2. request limits ─────────────────────────────────────────────────────

    #[test]
    fn request_limit_denies_once_window_is_full() {
        let limiter = WindowedRateLimiter::from_toml_str(
            r#"
            [[quotas]]
            id = "two-steps"
            entity = "*"
            action = "step_exec"
            max_requests = 2
            window_seconds = 60
            "#,
        )
        .unwrap();

        assert!(limiter.acquire("wf-1", "step_exec", 0.0).allowed);
        assert!(limiter.acquire("wf-1", "step_exec", 0.0).allowed);

        let denied = limiter.acquire("wf-1", "step_exec", 0.0);
        assert!(!denied.allowed);
        let reason = denied.reason.unwrap();
        assert!(reason.contains("two-steps"), "reason should name the rule, got: {reason}");

        // The wildcard rule tracks each entity separately.
        assert!(limiter.acquire("wf-2", "step_exec", 0.0).allowed);
        // Other actions are unmatched and allowed.
        assert!(limiter.acquire("wf-1", "notify", 0.0).allowed);

        let usage = limiter.usage("wf-1", "step_exec").unwrap();
        assert_eq!(usage.requests, 2, "denied requests are not recorded");
    }

    #[test]
    fn window_slides() {
        let limiter = WindowedRateLimiter::from_toml_str(
            r#"
            [[quotas]]
            id = "one"
            entity = "wf"
            action = "*"
            max_requests = 1
            window_seconds = 1
            "#,
        )
        .unwrap();

        assert!(limiter.acquire("wf", "a", 0.0).allowed);
        assert!(!limiter.acquire("wf", "a", 0.0).allowed);
        thread::sleep(Duration::from_millis(1100));
        assert!(limiter.acquire("wf", "a", 0.0).allowed);
    }

    // ── 3. cost budgets ───────────────────────────────────────────────────────

    #[test]
    fn cost_budget_and_alert() {
        let limiter = WindowedRateLimiter::from_toml_str(
            r#"
            [[quotas]]
            id = "bytes"
            entity = "*"
            action = "step_exec"
            window_seconds = 60
            max_cost = 100.0
            alert_threshold = 0.8
            "#,
        )
        .unwrap();

        assert!(limiter.acquire("wf", "step_exec", 50.0).allowed);
        assert!(limiter.alerts().is_empty());
        assert!(limiter.acquire("wf", "step_exec", 40.0).allowed);
        assert_eq!(limiter.alerts().len(), 1);

        let denied = limiter.acquire("wf", "step_exec", 20.0);
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("cost budget"));

        limiter.reset();
        assert!(limiter.alerts().is_empty());
        assert!(limiter.acquire("wf", "step_exec", 20.0).allowed);
    }

    // ── 4. first match wins ───────────────────────────────────────────────────

    #[test]
    fn first_matching_rule_wins() {
        let limiter = WindowedRateLimiter::from_toml_str(
            r#"
            [[quotas]]
            id = "vip"
            entity = "wf-vip"
            action = "*"

            [[quotas]]
            id = "everyone"
            entity = "*"
            action = "*"
            max_requests = 1
            "#,
        )
        .unwrap();

        for _ in 0..5 {
            assert!(limiter.acquire("wf-vip", "step_exec", 0.0).allowed);
        }
        assert!(limiter.acquire("wf-other", "step_exec", 0.0).allowed);
        assert!(!limiter.acquire("wf-other", "step_exec", 0.0).allowed);
        assert_eq!(limiter.rules().len(), 2);
        assert_eq!(limiter.usage("wf-vip", "x").unwrap().rule_id, "vip");
    }

    // ── 5. configuration errors ───────────────────────────────────────────────

    #[test]
    fn malformed_or_zero_window_config_is_rejected() {
        match WindowedRateLimiter::from_toml_str("[[quotas]]\nid = 3\n") {
            Err(OrchestraError::ConfigError { reason }) => assert!(reason.contains("quota TOML")),
            Err(other) => panic!("expected ConfigError, got {:?}", other),
            Ok(_) => panic!("malformed TOML must fail"),
        }

        let zero = r#"
            [[quotas]]
            id = "z"
            entity = "*"
            action = "*"
            window_seconds = 0
        "#;
        match WindowedRateLimiter::from_toml_str(zero) {
            Err(OrchestraError::ConfigError { reason }) => assert!(reason.contains("zero-length")),
            Err(other) => panic!("expected ConfigError, got {:?}", other),
            Ok(_) => panic!("zero window must fail"),
        }
    }
}
