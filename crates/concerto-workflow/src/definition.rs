//! Workflow definitions.
//!
//! A definition is loaded once from JSON and never mutated afterwards.
//! Loading runs three phases:
//!
//! 1. **Structural** — the document is validated against an embedded JSON
//!    Schema, and every violation is reported at once.
//! 2. **Typed** — serde turns the document into `StepConfig`s.
//! 3. **Semantic** — step names must be unique across the whole definition
//!    (parallel branches included), and each step kind must carry what it
//!    needs.
//!
//! Definition document shape:
//!
//! ```json
//! {
//!   "name": "review_pipeline",
//!   "steps": [
//!     { "name": "draft", "agent": "writer", "action": "draft",
//!       "parameters": { "topic": "{{topic}}" } },
//!     { "name": "checks", "step_type": "parallel", "parallel": [ ... ] },
//!     { "name": "publish", "step_type": "conditional", "condition": "{{approved}}",
//!       "agent": "publisher", "action": "publish" },
//!     { "name": "notify", "step_type": "loop", "agent": "mailer", "action": "send",
//!       "loop": { "variable": "recipient", "items": "${team.members}" } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use concerto_contracts::error::{OrchestraError, OrchestraResult};

// ── Public types ──────────────────────────────────────────────────────────────

/// Where a loop step gets its items.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopItems {
    Literal(Vec<Value>),
    /// A context key, `{{name}}` template or `${a.b}` path.
    Reference(String),
}

/// What a step does. Closed: the engine matches it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Task,
    Parallel { branches: Vec<WorkflowStep> },
    Conditional { condition: String },
    Loop { variable: String, items: LoopItems },
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Task => "task",
            StepKind::Parallel { .. } => "parallel",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    pub agent: Option<String>,
    pub action: Option<String>,
    /// Parameter templates, resolved against the context at run time.
    pub parameters: Map<String, Value>,
    /// Descriptive only. Steps run in definition order.
    pub dependencies: Vec<String>,
    pub kind: StepKind,
}

impl WorkflowStep {
    fn with_kind(name: &str, agent: Option<&str>, action: Option<&str>, kind: StepKind) -> Self {
        Self {
            name: name.to_string(),
            agent: agent.map(str::to_string),
            action: action.map(str::to_string),
            parameters: Map::new(),
            dependencies: Vec::new(),
            kind,
        }
    }

    pub fn task(name: &str, agent: &str, action: &str) -> Self {
        Self::with_kind(name, Some(agent), Some(action), StepKind::Task)
    }

    pub fn parallel(name: &str, branches: Vec<WorkflowStep>) -> Self {
        Self::with_kind(name, None, None, StepKind::Parallel { branches })
    }

    pub fn conditional(name: &str, agent: &str, action: &str, condition: &str) -> Self {
        Self::with_kind(
            name,
            Some(agent),
            Some(action),
            StepKind::Conditional {
                condition: condition.to_string(),
            },
        )
    }

    pub fn looped(name: &str, agent: &str, action: &str, variable: &str, items: LoopItems) -> Self {
        Self::with_kind(
            name,
            Some(agent),
            Some(action),
            StepKind::Loop {
                variable: variable.to_string(),
                items,
            },
        )
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// A named, validated, ordered list of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Build a definition in code. Runs the semantic checks.
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> OrchestraResult<Self> {
        let definition = Self {
            name: name.into(),
            description: None,
            steps,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Parse and validate a JSON definition document.
    pub fn from_json(document: &Value) -> OrchestraResult<Self> {
        validate_schema(document)?;

        let config: DefinitionConfig =
            serde_json::from_value(document.clone()).map_err(|e| OrchestraError::InvalidDefinition {
                reason: format!("malformed workflow definition: {}", e),
            })?;

        let steps = config
            .steps
            .into_iter()
            .map(StepConfig::into_step)
            .collect::<OrchestraResult<Vec<_>>>()?;

        let definition = Self {
            name: config.name,
            description: config.description,
            steps,
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_json_str(s: &str) -> OrchestraResult<Self> {
        let document: Value = serde_json::from_str(s).map_err(|e| OrchestraError::InvalidDefinition {
            reason: format!("workflow definition is not valid JSON: {}", e),
        })?;
        Self::from_json(&document)
    }

    /// Total number of steps, nested parallel branches included.
    pub fn step_count(&self) -> usize {
        fn count(steps: &[WorkflowStep]) -> usize {
            steps
                .iter()
                .map(|s| match &s.kind {
                    StepKind::Parallel { branches } => 1 + count(branches),
                    _ => 1,
                })
                .sum()
        }
        count(&self.steps)
    }

    fn validate(&self) -> OrchestraResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestraError::InvalidDefinition {
                reason: "workflow name must not be empty".to_string(),
            });
        }
        let mut seen = HashSet::new();
        validate_steps(&self.steps, &mut seen)
    }
}

fn validate_steps<'a>(steps: &'a [WorkflowStep], seen: &mut HashSet<&'a str>) -> OrchestraResult<()> {
    for step in steps {
        if step.name.trim().is_empty() {
            return Err(OrchestraError::InvalidDefinition {
                reason: "step name must not be empty".to_string(),
            });
        }
        if !seen.insert(step.name.as_str()) {
            return Err(OrchestraError::InvalidDefinition {
                reason: format!("duplicate step name '{}'", step.name),
            });
        }
        let needs_agent = match &step.kind {
            StepKind::Parallel { branches } => {
                validate_steps(branches, seen)?;
                false
            }
            StepKind::Conditional { condition } => {
                if condition.trim().is_empty() {
                    return Err(OrchestraError::InvalidDefinition {
                        reason: format!("conditional step '{}' has an empty condition", step.name),
                    });
                }
                true
            }
            StepKind::Loop { variable, .. } => {
                if variable.trim().is_empty() {
                    return Err(OrchestraError::InvalidDefinition {
                        reason: format!("loop step '{}' has an empty loop variable", step.name),
                    });
                }
                true
            }
            StepKind::Task => true,
        };
        if needs_agent && step.agent.as_deref().map_or(true, |a| a.trim().is_empty()) {
            return Err(OrchestraError::InvalidDefinition {
                reason: format!("{} step '{}' has no agent", step.kind, step.name),
            });
        }
    }
    Ok(())
}

// ── Document schema ───────────────────────────────────────────────────────────

fn definition_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["name", "steps"],
        "properties": {
            "name": { "type": "string", "minLength": 1 },
            "description": { "type": ["string", "null"] },
            "steps": { "type": "array", "items": { "$ref": "#/$defs/step" } }
        },
        "$defs": {
            "step": {
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "step_type": { "enum": ["task", "parallel", "conditional", "loop"] },
                    "agent": { "type": ["string", "null"] },
                    "action": { "type": ["string", "null"] },
                    "parameters": { "type": "object" },
                    "dependencies": { "type": "array", "items": { "type": "string" } },
                    "condition": { "type": ["string", "null"] },
                    "parallel": { "type": "array", "items": { "$ref": "#/$defs/step" } },
                    "loop": {
                        "type": "object",
                        "properties": {
                            "variable": { "type": "string", "minLength": 1 },
                            "items": { "type": ["array", "string", "null"] }
                        }
                    }
                }
            }
        }
    })
}

fn validate_schema(document: &Value) -> OrchestraResult<()> {
    let schema = definition_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| OrchestraError::InvalidDefinition {
        reason: format!("invalid definition schema: {e}"),
    })?;
    let violations: Vec<String> = validator
        .iter_errors(document)
        .map(|error| format!("at '{}': {}", error.instance_path, error))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(OrchestraError::InvalidDefinition {
            reason: format!("schema violation {}", violations.join("; ")),
        })
    }
}

// ── Document form ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DefinitionConfig {
    name: String,
    #[serde(default)]
    description: Option<String>,
    steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StepType {
    #[default]
    Task,
    Parallel,
    Conditional,
    Loop,
}

fn default_loop_variable() -> String {
    "item".to_string()
}

#[derive(Deserialize)]
struct LoopConfig {
    #[serde(default = "default_loop_variable")]
    variable: String,
    #[serde(default)]
    items: Value,
}

#[derive(Deserialize)]
struct StepConfig {
    name: String,
    #[serde(default)]
    step_type: StepType,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    parallel: Option<Vec<StepConfig>>,
    #[serde(default, rename = "loop")]
    loop_config: Option<LoopConfig>,
}

impl StepConfig {
    fn into_step(self) -> OrchestraResult<WorkflowStep> {
        let missing = |what: &str| OrchestraError::InvalidDefinition {
            reason: format!("step '{}' is missing '{}'", self.name, what),
        };
        let kind = match self.step_type {
            StepType::Task => StepKind::Task,
            StepType::Parallel => {
                let branches = self.parallel.ok_or_else(|| missing("parallel"))?;
                StepKind::Parallel {
                    branches: branches
                        .into_iter()
                        .map(StepConfig::into_step)
                        .collect::<OrchestraResult<Vec<_>>>()?,
                }
            }
            StepType::Conditional => StepKind::Conditional {
                condition: self.condition.ok_or_else(|| missing("condition"))?,
            },
            StepType::Loop => {
                let config = self.loop_config.ok_or_else(|| missing("loop"))?;
                let items = match config.items {
                    Value::Array(items) => LoopItems::Literal(items),
                    Value::String(reference) => LoopItems::Reference(reference),
                    Value::Null => LoopItems::Literal(Vec::new()),
                    other => {
                        return Err(OrchestraError::InvalidDefinition {
                            reason: format!(
                                "loop step '{}' items must be a list or a reference, got {}",
                                self.name, other
                            ),
                        })
                    }
                };
                StepKind::Loop {
                    variable: config.variable,
                    items,
                }
            }
        };
        Ok(WorkflowStep {
            name: self.name,
            agent: self.agent,
            action: self.action,
            parameters: self.parameters,
            dependencies: self.dependencies,
            kind,
        })
    }
}
