//! # concerto-workflow
//!
//! Multi-step workflow execution over a [`TaskDispatcher`](concerto_core::traits::TaskDispatcher).
//!
//! - [`definition`] — JSON definitions, schema and structural validation
//! - [`template`]   — the `{{name}}` / `${a.b}` grammar and conditions
//! - [`execution`]  — registry of running executions
//! - [`engine`]     — the step-execution state machine
//!
//! The engine knows nothing about agents; it only needs something that can
//! run a task on a named agent.

pub mod definition;
pub mod engine;
pub mod execution;
pub mod template;

pub use definition::{LoopItems, StepKind, WorkflowDefinition, WorkflowStep};
pub use engine::{WorkflowEngine, CANCELLED_ERROR};
pub use execution::{ActiveExecutions, SharedExecution};
