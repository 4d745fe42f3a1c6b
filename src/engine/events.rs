// SPDX-License-Identifier: MIT

//! Typed engine events
//!
//! Subscribers register explicitly and receive events over a channel; there
//! is no global emitter. The string names returned by `name()` are a
//! compatibility contract with downstream consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::engine::metrics::MonitoringSnapshot;

/// Everything the engine announces about workflow and queue progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    WorkflowQueued {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
    },
    WorkflowStarted {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
    },
    WorkflowCompleted {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
        duration_ms: u64,
    },
    WorkflowFailed {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
        error: String,
    },
    WorkflowCancelled {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
    },
    WorkflowTimedOut {
        workflow_id: String,
        execution_id: String,
        trace_id: String,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
        trace_id: String,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        trace_id: String,
        error: String,
    },
    StepSkipped {
        execution_id: String,
        step_id: String,
        trace_id: String,
        reason: String,
    },
    MessageDeadLettered {
        message_id: String,
        workflow_id: String,
        trace_id: String,
    },
    Metrics(MonitoringSnapshot),
}

impl EngineEvent {
    /// Wire name, kept identical to the source system's event names
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::WorkflowQueued { .. } => "workflow:queued",
            EngineEvent::WorkflowStarted { .. } => "workflow:started",
            EngineEvent::WorkflowCompleted { .. } => "workflow:completed",
            EngineEvent::WorkflowFailed { .. } => "workflow:failed",
            EngineEvent::WorkflowCancelled { .. } => "workflow:cancelled",
            EngineEvent::WorkflowTimedOut { .. } => "workflow:timed-out",
            EngineEvent::StepCompleted { .. } => "step:completed",
            EngineEvent::StepFailed { .. } => "step:failed",
            EngineEvent::StepSkipped { .. } => "step:skipped",
            EngineEvent::MessageDeadLettered { .. } => "queue:dead-letter",
            EngineEvent::Metrics(_) => "engine:metrics",
        }
    }
}

/// Fan-out of engine events to registered subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<mpsc::UnboundedSender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the receiver sees every event emitted after
    /// this call.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }

    /// Deliver an event to all live subscribers, dropping closed ones
    pub async fn emit(&self, event: EngineEvent) {
        log::debug!("event {}", event.name());
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
