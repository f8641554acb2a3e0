//! Scenario 4: Idempotent Steps and Durable Replay
//!
//! A `render` step runs under an `IdempotencyGuard` backed by an in-memory
//! store and the TOML step budget in `config/quotas.toml`:
//!
//!   4a. First execution runs the body and journals the outputs
//!   4b. Same inputs again: replayed from the journal, body not called
//!   4c. A fresh registry on the same store: replayed from the store
//!   4d. New inputs until the step budget refuses one
//!
//! The journal's hash chain is verified at the end and any budget alerts
//! raised by the limiter are listed.

use std::cell::Cell;
use std::sync::Arc;

use serde_json::{json, Value};

use concerto_contracts::error::{OrchestraError, OrchestraResult};
use concerto_core::traits::{MemoryStore, RateLimiter};
use concerto_memory::InMemoryStore;
use concerto_quota::WindowedRateLimiter;
use concerto_safety::{SafetyRegistry, STEP_EXEC_ACTION};

const STEP_BUDGET: &str = include_str!("../../config/quotas.toml");

const WORKFLOW_ID: &str = "render_chapters";

fn chapter(n: u64) -> Value {
    json!({
        "chapter": n,
        "template": "book/chapter.html",
        "locale": "en-GB",
    })
}

pub fn run_scenario() -> OrchestraResult<()> {
    println!("=== Scenario 4: Idempotent Steps and Durable Replay ===");
    println!();

    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let quota = Arc::new(WindowedRateLimiter::from_toml_str(STEP_BUDGET)?);
    let limiter: Arc<dyn RateLimiter> = quota.clone();
    let registry = SafetyRegistry::new(Some(Arc::clone(&store)), Some(Arc::clone(&limiter)));
    let guard = registry.guard(WORKFLOW_ID);

    let body_calls = Cell::new(0usize);
    let render = |inputs: &Value| -> OrchestraResult<Value> {
        body_calls.set(body_calls.get() + 1);
        Ok(json!({
            "page": format!("chapter-{}.html", inputs["chapter"]),
            "seed": inputs["__seed"],
        }))
    };

    // ── 4a / 4b ───────────────────────────────────────────────────────────────

    println!("  Case 4a — first execution");
    let (replayed, outputs) = guard.execute_step("render", &chapter(1), None, render)?;
    println!("  Replayed: {} | Output: {}", replayed, outputs["page"]);
    println!();

    println!("  Case 4b — same inputs again");
    let (replayed, outputs) = guard.execute_step("render", &chapter(1), None, render)?;
    println!("  Replayed: {} | Output: {}", replayed, outputs["page"]);
    println!("  Body executions so far: {}", body_calls.get());
    println!();

    // ── 4c ────────────────────────────────────────────────────────────────────

    println!("  Case 4c — fresh registry, same store");
    let recovered = SafetyRegistry::new(Some(Arc::clone(&store)), Some(Arc::clone(&limiter)));
    let fresh = recovered.guard(WORKFLOW_ID);
    let (replayed, outputs) = fresh.execute_step("render", &chapter(1), None, render)?;
    println!("  Replayed: {} | Output: {}", replayed, outputs["page"]);
    println!("  Body executions so far: {}", body_calls.get());
    println!();

    // ── 4d ────────────────────────────────────────────────────────────────────

    println!("  Case 4d — new chapters against the step budget");
    for n in 2..=6 {
        match guard.execute_step("render", &chapter(n), None, render) {
            Ok((_, outputs)) => println!("  chapter {}: rendered {}", n, outputs["page"]),
            Err(e @ OrchestraError::QuotaExceeded { .. }) => {
                println!("  chapter {}: refused ({})", n, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    if let Some(usage) = quota.usage(WORKFLOW_ID, STEP_EXEC_ACTION) {
        println!(
            "  Usage under '{}': {} request(s), cost {}",
            usage.rule_id, usage.requests, usage.cost
        );
    }
    println!();

    // ── Integrity ─────────────────────────────────────────────────────────────

    println!("  Journal records:   {}", guard.journal_len());
    println!(
        "  Chain integrity:   {}",
        if guard.verify_integrity() { "VALID" } else { "BROKEN" }
    );
    println!("  Outbox entries:    {}", guard.get_outbox().len());
    for alert in quota.alerts() {
        println!("  Budget alert:      [{}] {}", alert.rule_id, alert.message);
    }
    println!();

    Ok(())
}
