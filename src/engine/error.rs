// SPDX-License-Identifier: MIT

//! Typed error handling for the orchestration engine
//!
//! Structural errors (validation, not-found, conflict) are returned
//! synchronously to the API caller and never enter the queue. Execution-time
//! errors are captured on the execution/step records and drive the status
//! state machine; `is_retryable` decides whether the queue message is
//! requeued or dead-lettered.

use thiserror::Error;

/// Top-level error type for the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed workflow definition, fatal and never retried
    #[error("Validation error{}: {reason}", step_id.as_ref().map(|s| format!(" at step '{}'", s)).unwrap_or_default())]
    Validation {
        step_id: Option<String>,
        reason: String,
    },

    /// Unknown workflow or execution id
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Operation rejected because of concurrent state (e.g. delete with active executions)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A step's body failed; aborts the execution
    #[error("Step '{step_id}' failed: {message}")]
    StepExecution {
        step_id: String,
        message: String,
        retryable: bool,
    },

    /// Dependency unavailable, call short-circuited by an open breaker
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    /// No handler registered for the requested agent type
    #[error("Unknown agent type: {agent_type}")]
    UnknownAgent { agent_type: String },

    /// Malformed condition expression or evaluation failure
    #[error("Condition evaluation error: {0}")]
    Eval(String),

    /// Unknown transform name or malformed transform configuration
    #[error("Transform error: {0}")]
    Transform(String),

    /// Engine is not running or shutting down
    #[error("Engine is not running")]
    NotRunning,

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors (webhook steps)
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Create a validation error with no step attribution
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            step_id: None,
            reason: reason.into(),
        }
    }

    /// Create a validation error attributed to a step
    pub fn validation_at(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            step_id: Some(step_id.into()),
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a step execution error
    pub fn step(step_id: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::StepExecution {
            step_id: step_id.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether the queue layer may retry the message that produced this error.
    ///
    /// Eval/Transform failures are structural properties of the step
    /// configuration; rerunning them can never succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::StepExecution { retryable, .. } => *retryable,
            EngineError::CircuitOpen { .. } => true,
            EngineError::Http(_) | EngineError::Io(_) => true,
            EngineError::Validation { .. }
            | EngineError::NotFound { .. }
            | EngineError::Conflict(_)
            | EngineError::UnknownAgent { .. }
            | EngineError::Eval(_)
            | EngineError::Transform(_)
            | EngineError::NotRunning
            | EngineError::Json(_)
            | EngineError::Yaml(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_with_step() {
        let err = EngineError::validation_at("step_b", "unknown dependency");
        assert_eq!(
            err.to_string(),
            "Validation error at step 'step_b': unknown dependency"
        );
    }

    #[test]
    fn test_validation_display_without_step() {
        let err = EngineError::validation("workflow has no steps");
        assert_eq!(err.to_string(), "Validation error: workflow has no steps");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::step("s1", "timeout", true).is_retryable());
        assert!(!EngineError::step("s1", "bad config", false).is_retryable());
        assert!(EngineError::CircuitOpen {
            breaker: "agent:echo".into()
        }
        .is_retryable());
        assert!(!EngineError::Eval("bad expression".into()).is_retryable());
        assert!(!EngineError::Transform("unknown transform".into()).is_retryable());
        assert!(!EngineError::validation("no steps").is_retryable());
    }
}
