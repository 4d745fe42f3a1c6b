// SPDX-License-Identifier: MIT

//! Queue transport types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::types::{QueueLane, WorkflowPriority};

/// What a queue message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    WorkflowExecution,
    StepExecution,
    Event,
}

/// Correlation and delivery bookkeeping attached to every message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub workflow_id: String,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    /// Delivery is withheld until this instant when set
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Requeue deliveries consumed so far. Never exceeds `max_retries`;
    /// the message is dead-lettered instead.
    pub retry_count: u32,
    pub max_retries: u32,
}

/// The unit of queue transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub message_type: MessageType,
    pub priority: WorkflowPriority,
    pub payload: serde_json::Value,
    pub metadata: MessageMetadata,
}

impl QueueMessage {
    /// Message asking a worker to drive one workflow execution
    pub fn workflow_execution(
        workflow_id: &str,
        execution_id: &str,
        trace_id: &str,
        priority: WorkflowPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::WorkflowExecution,
            priority,
            payload: serde_json::json!({ "execution_id": execution_id }),
            metadata: MessageMetadata {
                workflow_id: workflow_id.to_string(),
                execution_id: Some(execution_id.to_string()),
                step_id: None,
                trace_id: trace_id.to_string(),
                created_at: Utc::now(),
                scheduled_at: None,
                retry_count: 0,
                max_retries,
            },
        }
    }

    pub fn lane(&self) -> QueueLane {
        QueueLane::from(self.priority)
    }

    /// Whether the message is already eligible for delivery
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.metadata.scheduled_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}
