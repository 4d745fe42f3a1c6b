// SPDX-License-Identifier: MIT

//! Execution-state persistence contract
//!
//! The store is a passive persistence target. While an execution is RUNNING
//! the engine's in-memory active table is authoritative; the store only has
//! to apply upserts keyed by id and answer the queries below. The in-memory
//! implementation backs tests and the CLI; a database-backed store plugs in
//! through the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::engine::error::EngineError;
use crate::engine::execution::{ExecutionStatus, WorkflowExecution};
use crate::engine::types::WorkflowDefinition;

/// Filters for `list_executions`
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<String>,
    pub status: Option<ExecutionStatus>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn upsert_workflow(&self, definition: &WorkflowDefinition) -> Result<(), EngineError>;
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, EngineError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError>;

    async fn upsert_execution(&self, execution: &WorkflowExecution) -> Result<(), EngineError>;
    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>, EngineError>;
    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, EngineError>;

    /// QUEUED or RUNNING executions for a workflow, used for delete safety
    async fn count_active_executions(&self, workflow_id: &str) -> Result<usize, EngineError>;

    /// RUNNING executions whose last start predates the cutoff. External
    /// repair tooling reconciles these; the engine only makes them queryable.
    async fn find_stuck_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, EngineError>;
}

/// Hash-map backed store
#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    executions: RwLock<HashMap<String, WorkflowExecution>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn upsert_workflow(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        let mut workflows = self.workflows.write().await;
        workflows.insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<WorkflowDefinition> = workflows.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn upsert_execution(&self, execution: &WorkflowExecution) -> Result<(), EngineError> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>, EngineError> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<WorkflowExecution> = executions
            .values()
            .filter(|e| {
                filter
                    .workflow_id
                    .as_ref()
                    .map(|id| &e.workflow_id == id)
                    .unwrap_or(true)
                    && filter.status.map(|s| e.status == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn count_active_executions(&self, workflow_id: &str) -> Result<usize, EngineError> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| {
                e.workflow_id == workflow_id
                    && matches!(
                        e.status,
                        ExecutionStatus::Queued | ExecutionStatus::Running
                    )
            })
            .count())
    }

    async fn find_stuck_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Running
                    && e.started_at.map(|t| t < older_than).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
