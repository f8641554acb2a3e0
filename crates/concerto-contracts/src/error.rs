//! Runtime error types for the Concerto orchestration runtime.
//!
//! All fallible operations return `OrchestraResult<T>`. Every variant carries
//! enough context to produce a human-readable reason for the caller.

use thiserror::Error;

/// The unified error type for the Concerto runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestraError {
    /// A task or status query referenced an agent that is not in the registry.
    #[error("agent '{agent}' is not registered")]
    AgentNotRegistered { agent: String },

    /// An agent with the same name is already registered.
    #[error("agent '{agent}' is already registered")]
    AgentAlreadyRegistered { agent: String },

    /// The agent is not `Idle` and cannot accept another task.
    #[error("agent '{agent}' is not available (status: {status})")]
    AgentBusy { agent: String, status: String },

    /// A correlated request did not receive a response in time.
    #[error("request to '{target}' timed out after {timeout_ms} ms")]
    TaskTimeout { target: String, timeout_ms: u64 },

    /// A collaboration offer did not receive a response in time.
    ///
    /// Soft: the communicator turns this into an `{accepted: false}` reply.
    #[error("collaboration offer to '{target}' timed out")]
    CollaborationTimeout { target: String },

    /// No workflow definition is registered under this name.
    #[error("workflow '{workflow}' not found")]
    WorkflowNotFound { workflow: String },

    /// An explicit workflow id collides with an execution that is still active.
    #[error("workflow id '{workflow_id}' is already active")]
    DuplicateWorkflowId { workflow_id: String },

    /// A workflow step (or the agent behind it) failed.
    #[error("step '{step}' failed: {reason}")]
    StepExecutionFailed { step: String, reason: String },

    /// A conditional step's condition could not be evaluated.
    #[error("failed to evaluate condition '{condition}': {reason}")]
    ConditionEvaluationError { condition: String, reason: String },

    /// The rate limiter refused the action.
    #[error("quota exceeded for '{entity}': {reason}")]
    QuotaExceeded { entity: String, reason: String },

    /// A message was used in a way its kind does not allow.
    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// A workflow definition failed schema or structural validation.
    #[error("invalid workflow definition: {reason}")]
    InvalidDefinition { reason: String },

    /// An agent handler returned an error or panicked.
    #[error("handler failed: {reason}")]
    HandlerFailed { reason: String },

    /// The replay journal could not persist a record.
    #[error("journal write failed: {reason}")]
    JournalWriteFailed { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

/// Convenience alias used throughout the Concerto crates.
pub type OrchestraResult<T> = Result<T, OrchestraError>;
