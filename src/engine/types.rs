// SPDX-License-Identifier: MIT

//! Schema types for workflow definitions
//!
//! Definitions are plain serde types so they can be registered
//! programmatically or loaded from YAML files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduling priority of a workflow. Maps onto the queue lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    Background,
}

/// The four delivery lanes of the message queue, in strict priority order.
///
/// `Medium` and `Low` workflow priorities both ride the normal lane; the
/// queue has no finer distinction between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueLane {
    Critical,
    High,
    Normal,
    Background,
}

impl QueueLane {
    pub const ALL: [QueueLane; 4] = [
        QueueLane::Critical,
        QueueLane::High,
        QueueLane::Normal,
        QueueLane::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueLane::Critical => "critical",
            QueueLane::High => "high",
            QueueLane::Normal => "normal",
            QueueLane::Background => "background",
        }
    }
}

impl From<WorkflowPriority> for QueueLane {
    fn from(priority: WorkflowPriority) -> Self {
        match priority {
            WorkflowPriority::Critical => QueueLane::Critical,
            WorkflowPriority::High => QueueLane::High,
            WorkflowPriority::Medium | WorkflowPriority::Low => QueueLane::Normal,
            WorkflowPriority::Background => QueueLane::Background,
        }
    }
}

/// Retry/backoff policy for a workflow or an individual step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 = no retry)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_ms: u64,
    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 500,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying after the given 1-based failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_ms as f64 * self.backoff_multiplier.powi(exp as i32);
        std::time::Duration::from_millis(ms as u64)
    }
}

/// How a workflow gets kicked off
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Trigger {
    /// Started explicitly via `execute_workflow`
    Manual,
    /// Started when a matching event reaches `publish_event`
    Event { event_type: String },
}

/// Gating condition attached to a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepCondition {
    /// Restricted boolean expression, e.g. `status == 'ready' and retries < 3`
    pub expression: String,
    /// Variable names the expression reads from the step input. Checked at
    /// registration: each declared name must appear in the expression.
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Step body, keyed by the step `type` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum StepKind {
    /// Invoke a registered agent handler
    Agent {
        agent_type: String,
        #[serde(default)]
        options: serde_json::Value,
    },
    /// Apply a named pure transform to the current data
    Transform {
        name: String,
        #[serde(default)]
        options: serde_json::Value,
    },
    /// Evaluate an expression; the boolean result becomes the current data
    Condition { expression: String },
    /// Join node: waits for its dependencies and passes data through unchanged
    Parallel {},
    /// Sleep for the configured duration; current data unchanged
    Delay { duration_ms: u64 },
    /// HTTP call; the response JSON becomes the current data
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Agent { .. } => "agent",
            StepKind::Transform { .. } => "transform",
            StepKind::Condition { .. } => "condition",
            StepKind::Parallel {} => "parallel",
            StepKind::Delay { .. } => "delay",
            StepKind::Webhook { .. } => "webhook",
        }
    }
}

/// One node in a workflow's step graph. Read-only once registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Unique step identifier within the workflow
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Step ids that must complete (or be skipped) before this step runs
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional gating condition; false means the step is skipped
    #[serde(default)]
    pub condition: Option<StepCondition>,
    /// Per-step retry policy, overrides the workflow's
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Per-step timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Immutable-once-registered workflow template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Wall-clock budget for one execution, milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub priority: WorkflowPriority,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Whether any trigger matches the given event type
    pub fn listens_for(&self, event_type: &str) -> bool {
        self.triggers.iter().any(|t| match t {
            Trigger::Event { event_type: et } => et == event_type,
            Trigger::Manual => false,
        })
    }
}

/// Partial update applied to a registered workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    pub name: Option<String>,
    pub steps: Option<Vec<WorkflowStep>>,
    pub triggers: Option<Vec<Trigger>>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub priority: Option<WorkflowPriority>,
}

/// Inbound event delivered to `publish_event`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Correlation id propagated into every execution the event starts
    #[serde(default)]
    pub trace_id: Option<String>,
}


fn default_version() -> u32 {
    1
}
