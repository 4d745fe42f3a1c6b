// SPDX-License-Identifier: MIT

//! Workflow orchestration engine
//!
//! Workflows are registered as step graphs, executed asynchronously through
//! a four-lane priority queue by a worker pool, and observed through typed
//! events and a monitoring snapshot.

pub mod agent;
pub mod breaker;
pub mod condition;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod metrics;
pub mod queue;
pub mod runner;
pub mod store;
pub mod transform;
pub mod types;
pub mod validator;

#[allow(clippy::module_inception)]
mod engine;

pub use agent::{AgentExecutor, AgentHandler, AgentRequest, AgentResponse};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use config::EngineConfig;
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use execution::{
    ExecutionContext, ExecutionMetrics, ExecutionStatus, StepExecution, StepStatus,
    WorkflowExecution,
};
pub use metrics::{MonitoringSnapshot, ResourceUtilization};
pub use queue::{InMemoryQueue, MessageQueue, NackOutcome, QueueMessage, QueueStats};
pub use store::{ExecutionFilter, ExecutionStore, InMemoryStore};
pub use transform::TransformRegistry;
pub use types::{
    QueueLane, RetryPolicy, StepCondition, StepKind, Trigger, TriggerEvent, WorkflowDefinition,
    WorkflowPriority, WorkflowStep, WorkflowUpdate,
};
