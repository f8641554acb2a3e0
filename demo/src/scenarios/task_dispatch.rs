//! Scenario 1: Single Task Round Trip
//!
//! Registers a `writer` agent with a custom task handler and dispatches one
//! task through the orchestrator. The request travels over the bus to
//! `agent.writer`; the handler's answer comes back as a correlated
//! `task_response`. Afterwards the scenario shows the agent back at `Idle`,
//! the orchestrator counters, what the memory collaborators recorded, and
//! the error a task for an unknown agent produces.

use serde_json::{json, Value};

use concerto_contracts::{
    agent::TaskRequest,
    config::RuntimeConfig,
    error::{OrchestraError, OrchestraResult},
};

use super::Runtime;

pub fn run_scenario(config: &RuntimeConfig) -> OrchestraResult<()> {
    println!("=== Scenario 1: Single Task Round Trip ===");
    println!();

    let runtime = Runtime::start(config)?;
    let writer = runtime.agent("writer", "content_writer", &["draft", "edit"])?;
    writer.register_task_handler(|request| {
        let topic = request.payload["task"]["parameters"]["topic"]
            .as_str()
            .unwrap_or("untitled");
        Ok(json!({
            "draft": format!("A short piece about {}.", topic),
            "words": 5,
        }))
    });
    println!("  Agent registered: writer (role: content_writer, capabilities: draft, edit)");
    println!("  Knowledge graph:  writer can_do {:?}", runtime.graph.objects("writer", "can_do"));
    println!();

    // ── Dispatch ──────────────────────────────────────────────────────────────

    let task = TaskRequest::action("draft").with_parameter("topic", json!("message buses"));
    println!("  Case 1a — execute_task(writer, draft)");
    let reply = runtime.orchestrator.execute_task("writer", &task)?;
    println!("  Reply:    {}", reply["draft"].as_str().unwrap_or("?"));
    match runtime.orchestrator.get_agent_status("writer") {
        Some(record) => println!("  Status:   {}", record.status),
        None => println!("  UNEXPECTED: writer missing from registry"),
    }
    println!();

    // ── Unknown agent ─────────────────────────────────────────────────────────

    println!("  Case 1b — execute_task(ghost, draft)");
    match runtime.orchestrator.execute_task("ghost", &task) {
        Err(e @ OrchestraError::AgentNotRegistered { .. }) => println!("  Refused:  {}", e),
        other => println!("  UNEXPECTED: {:?}", other),
    }
    println!();

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    let stats = runtime.orchestrator.get_orchestrator_stats();
    println!(
        "  Tasks: {} total, {} successful, {} failed | Agents: {} registered, {} idle, {} busy",
        stats.total_tasks,
        stats.successful_tasks,
        stats.failed_tasks,
        stats.registered_agents,
        stats.idle_agents,
        stats.busy_agents,
    );
    let memory = runtime.orchestrator.get_memory_stats();
    println!(
        "  Memory: {} experience(s), {} working item(s), {} fact(s)",
        count(&memory.episodic, "total_experiences"),
        count(&memory.working, "total_items"),
        count(&memory.semantic, "total_triples"),
    );
    println!();

    runtime.shutdown();
    Ok(())
}

fn count(stats: &Value, field: &str) -> u64 {
    stats.get(field).and_then(Value::as_u64).unwrap_or(0)
}
