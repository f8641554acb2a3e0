//! Scenario 2: Content Pipeline Workflow
//!
//! Loads a JSON workflow definition and runs it over five scripted agents:
//!
//!   research (task) → drafting (parallel: outline, glossary)
//!     → review (loop over the research sources) → publish (conditional)
//!
//! Every step's output lands in the workflow context as `<step>_result`, so
//! later steps template against earlier ones (`${research_result.sources}`).
//! The run is repeated with `approved: false` to show the conditional step
//! recorded as skipped.

use serde_json::{json, Value};

use concerto_contracts::{
    agent::TaskRequest,
    config::RuntimeConfig,
    error::{OrchestraError, OrchestraResult},
    message::AgentMessage,
};

use super::Runtime;

const PIPELINE_DEFINITION: &str = include_str!("../../config/content_pipeline.json");

const SOURCES: [&str; 3] = ["rfc-9110", "bus-design-notes", "queueing-handbook"];

// ── Agent behaviour ───────────────────────────────────────────────────────────

fn parameters(request: &AgentMessage) -> TaskRequest {
    serde_json::from_value(request.payload["task"].clone()).unwrap_or_default()
}

fn researcher(request: &AgentMessage) -> OrchestraResult<Value> {
    let task = parameters(request);
    Ok(json!({
        "topic": task.parameters.get("topic").cloned().unwrap_or(Value::Null),
        "sources": SOURCES,
    }))
}

fn outliner(request: &AgentMessage) -> OrchestraResult<Value> {
    let task = parameters(request);
    let topic = task.parameters.get("topic").and_then(Value::as_str).unwrap_or("?");
    Ok(json!({
        "sections": [
            format!("What {} are", topic),
            "Delivery guarantees".to_string(),
            "Failure modes".to_string(),
        ],
    }))
}

fn glossarist(request: &AgentMessage) -> OrchestraResult<Value> {
    let task = parameters(request);
    let terms = task
        .parameters
        .get("sources")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    Ok(json!({ "terms_defined": terms * 2 }))
}

fn reviewer(request: &AgentMessage) -> OrchestraResult<Value> {
    let task = parameters(request);
    let source = task.parameters.get("source").and_then(Value::as_str).unwrap_or("?");
    Ok(json!({ "source": source, "verdict": "cited correctly" }))
}

fn publisher(request: &AgentMessage) -> OrchestraResult<Value> {
    let task = parameters(request);
    let title = task.parameters.get("title").and_then(Value::as_str).unwrap_or("untitled");
    Ok(json!({ "published": true, "slug": title.replace(' ', "-") }))
}

// ── Scenario ──────────────────────────────────────────────────────────────────

pub fn run_scenario(config: &RuntimeConfig) -> OrchestraResult<()> {
    println!("=== Scenario 2: Content Pipeline Workflow ===");
    println!();

    let runtime = Runtime::start(config)?;
    runtime.agent("researcher", "researcher", &["gather"])?.register_task_handler(researcher);
    runtime.agent("outliner", "writer", &["outline"])?.register_task_handler(outliner);
    runtime.agent("glossarist", "writer", &["define_terms"])?.register_task_handler(glossarist);
    runtime.agent("reviewer", "editor", &["check_source"])?.register_task_handler(reviewer);
    runtime.agent("publisher", "publisher", &["publish"])?.register_task_handler(publisher);

    let document: Value = serde_json::from_str(PIPELINE_DEFINITION).map_err(|e| OrchestraError::ConfigError {
        reason: format!("invalid workflow definition: {}", e),
    })?;
    let name = runtime.orchestrator.workflow_engine().load_workflow_json(&document)?;
    println!("  Workflow loaded: {}", name);
    println!("  Agents: researcher, outliner, glossarist, reviewer, publisher");
    println!();

    // ── Approved run ──────────────────────────────────────────────────────────

    println!("  Case 2a — request approved");
    let outcome = runtime.orchestrator.execute_workflow(
        &name,
        json!({ "request": { "topic": "message buses", "approved": true } }),
    )?;
    println!("  Workflow id:   {}", outcome.workflow_id);
    println!("  Success:       {} ({:.3}s)", outcome.success, outcome.execution_time);
    match &outcome.result {
        Some(context) => {
            println!("  research:      {}", context["research_result"]["sources"]);
            println!("  drafting:      {}", context["drafting_result"]);
            println!(
                "  review:        {} source(s) checked",
                context["review_result"].as_array().map_or(0, Vec::len)
            );
            println!("  publish:       {}", context["publish_result"]);
        }
        None => println!("  UNEXPECTED: {:?}", outcome.error),
    }
    println!();

    // ── Not approved ──────────────────────────────────────────────────────────

    println!("  Case 2b — request not approved");
    let outcome = runtime.orchestrator.execute_workflow(
        &name,
        json!({ "request": { "topic": "message buses", "approved": false } }),
    )?;
    match (&outcome.result, outcome.success) {
        (Some(context), true) => println!("  publish:       {}", context["publish_result"]),
        _ => println!("  UNEXPECTED: {:?}", outcome.error),
    }
    println!();

    let stats = runtime.orchestrator.get_orchestrator_stats();
    println!(
        "  Tasks dispatched: {} ({} successful, {} failed)",
        stats.total_tasks, stats.successful_tasks, stats.failed_tasks
    );
    println!();

    runtime.shutdown();
    Ok(())
}
