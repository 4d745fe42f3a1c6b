// SPDX-License-Identifier: MIT

//! Runtime records for workflow and step executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a workflow execution. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(rename = "TIMED_OUT")]
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::TimedOut
        )
    }

    /// Forward-only transition check: QUEUED -> RUNNING -> terminal
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Queued => {
                matches!(next, ExecutionStatus::Running | ExecutionStatus::Cancelled)
            }
            ExecutionStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Lifecycle of a single step run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

/// Caller-supplied identifiers and variables threaded through an execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    /// Correlation id shared by the execution, its steps and queue messages
    #[serde(default)]
    pub trace_id: String,
}

impl ExecutionContext {
    /// Context as a JSON object for condition evaluation
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Timing and counting measurements for one execution
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Milliseconds spent QUEUED before a worker picked the execution up
    pub queue_time_ms: u64,
    /// Milliseconds spent RUNNING
    pub execution_time_ms: u64,
    pub step_count: u32,
    /// Step attempts beyond the first, across all steps and deliveries
    pub retry_count: u32,
}

/// One step's run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// 1-based attempt counter
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl StepExecution {
    pub fn started(step_id: &str, input: serde_json::Value, attempt: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            attempt,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            logs: Vec::new(),
        }
    }

    /// Record a step that never ran because its condition gated it out
    /// or its dependencies can never be satisfied.
    pub fn skipped(step_id: &str, input: serde_json::Value, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Skipped,
            input,
            output: None,
            error: None,
            attempt: 1,
            started_at: now,
            completed_at: Some(now),
            duration_ms: Some(0),
            logs: vec![reason.to_string()],
        }
    }

    pub fn finish(&mut self, status: StepStatus, output: Option<serde_json::Value>, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.output = output;
        self.error = error;
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.completed_at = Some(now);
    }
}

/// A single run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    /// Pinned definition version so in-flight runs ignore later edits
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub context: ExecutionContext,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Step records in execution order, not declaration order
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
}

impl WorkflowExecution {
    pub fn queued(
        workflow_id: &str,
        workflow_version: u32,
        input: serde_json::Value,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_version,
            status: ExecutionStatus::Queued,
            input,
            output: None,
            error: None,
            context,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            steps: Vec::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Advance the status, enforcing the forward-only state machine.
    /// Returns false (and leaves the record untouched) on an illegal move.
    pub fn transition_to(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            ExecutionStatus::Running => {
                self.started_at = Some(now);
                self.metrics.queue_time_ms =
                    (now - self.created_at).num_milliseconds().max(0) as u64;
            }
            _ if next.is_terminal() => {
                self.completed_at = Some(now);
                if let Some(started) = self.started_at {
                    let elapsed = (now - started).num_milliseconds().max(0) as u64;
                    self.duration_ms = Some(elapsed);
                    self.metrics.execution_time_ms = elapsed;
                }
            }
            _ => {}
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_forward_only_transitions() {
        let mut exec = WorkflowExecution::queued("wf", 1, json!({}), ExecutionContext::default());
        assert_eq!(exec.status, ExecutionStatus::Queued);

        assert!(exec.transition_to(ExecutionStatus::Running));
        assert!(exec.started_at.is_some());

        assert!(exec.transition_to(ExecutionStatus::Completed));
        assert!(exec.completed_at.is_some());

        // Terminal states never transition out
        assert!(!exec.transition_to(ExecutionStatus::Running));
        assert!(!exec.transition_to(ExecutionStatus::Failed));
        assert_eq!(exec.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_queued_cannot_jump_to_completed() {
        let mut exec = WorkflowExecution::queued("wf", 1, json!({}), ExecutionContext::default());
        assert!(!exec.transition_to(ExecutionStatus::Completed));
        assert_eq!(exec.status, ExecutionStatus::Queued);
    }

    #[test]
    fn test_queued_can_be_cancelled() {
        let mut exec = WorkflowExecution::queued("wf", 1, json!({}), ExecutionContext::default());
        assert!(exec.transition_to(ExecutionStatus::Cancelled));
        assert!(exec.status.is_terminal());
    }

    #[test]
    fn test_step_execution_finish() {
        let mut step = StepExecution::started("s1", json!({"x": 1}), 1);
        assert_eq!(step.status, StepStatus::Running);
        step.finish(StepStatus::Completed, Some(json!({"y": 2})), None);
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.completed_at.is_some());
        assert_eq!(step.output, Some(json!({"y": 2})));
    }

    #[test]
    fn test_skipped_record() {
        let step = StepExecution::skipped("s1", json!({}), "condition evaluated to false");
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.duration_ms, Some(0));
        assert_eq!(step.logs.len(), 1);
    }

    #[test]
    fn test_status_serialization_names() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::TimedOut).unwrap(),
            "\"TIMED_OUT\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Skipped).unwrap(),
            "\"SKIPPED\""
        );
    }
}
