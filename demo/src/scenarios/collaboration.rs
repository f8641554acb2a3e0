//! Scenario 3: Collaboration Offers
//!
//! A `lead` agent opens collaborations with two registered peers and one
//! name nobody registered. Offers go out in the background; each peer's
//! collaboration handler answers accept or decline, and the unknown name is
//! recorded as `not_registered`. A session completes once every answer is in
//! if at least one participant accepted, and fails otherwise.
//!
//!   3a. `code_review` — the default handler accepts it
//!   3b. `deployment`  — nobody accepts, the session fails

use std::time::{Duration, Instant};

use serde_json::{json, Map};

use concerto_contracts::{
    agent::{CollaborationStatus, CollaborationSummary},
    config::RuntimeConfig,
    error::OrchestraResult,
};

use super::Runtime;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run_scenario(config: &RuntimeConfig) -> OrchestraResult<()> {
    println!("=== Scenario 3: Collaboration Offers ===");
    println!();

    let runtime = Runtime::start(config)?;
    runtime.agent("lead", "coordinator", &["plan"])?;
    runtime.agent("reviewer", "editor", &["review"])?;
    let analyst = runtime.agent("analyst", "analyst", &["analyze"])?;
    analyst.register_collaboration_handler(|offer| {
        let kind = offer.payload["collaboration_type"].as_str().unwrap_or("unknown");
        Ok(json!({
            "accepted": kind == "code_review",
            "reason": format!("analyst only joins code reviews, not {}", kind),
        }))
    });

    let participants: Vec<String> = ["reviewer", "analyst", "ghost"].map(String::from).to_vec();
    println!("  Initiator: lead | Invited: {}", participants.join(", "));
    println!();

    for (case, kind) in [("3a", "code_review"), ("3b", "deployment")] {
        let mut context = Map::new();
        context.insert("change".to_string(), json!("bus: bounded priority queue"));

        println!("  Case {} — {}", case, kind);
        let id = runtime
            .orchestrator
            .start_collaboration("lead", &participants, kind, context);
        println!("  Session:  {}", id);

        match wait_for_settle(&runtime, &id) {
            Some(summary) => {
                println!(
                    "  Status:   {:?} after {} answer(s) in {} ms",
                    summary.status, summary.results_count, summary.duration_ms
                );
                println!("  Members:  {}", summary.participants.join(", "));
            }
            None => println!("  UNEXPECTED: session {} did not settle", id),
        }
        println!();
    }

    let stats = runtime.orchestrator.get_orchestrator_stats();
    println!(
        "  Collaborations: {} started, {} still active",
        stats.total_collaborations, stats.active_collaborations
    );
    println!();

    runtime.shutdown();
    Ok(())
}

fn wait_for_settle(runtime: &Runtime, id: &str) -> Option<CollaborationSummary> {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        match runtime.orchestrator.get_collaboration(id) {
            Some(summary) if summary.status != CollaborationStatus::Active => return Some(summary),
            Some(_) => std::thread::sleep(Duration::from_millis(20)),
            None => return None,
        }
    }
    None
}

