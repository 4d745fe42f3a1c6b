// SPDX-License-Identifier: MIT

//! The workflow engine
//!
//! Owns the workflow registry, the execution queue and the worker pool.
//! Callers interact only with this type: register definitions, enqueue
//! executions, publish trigger events, subscribe to events, read metrics.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::agent::{AgentExecutor, AgentHandler};
use crate::engine::breaker::BreakerRegistry;
use crate::engine::config::EngineConfig;
use crate::engine::error::EngineError;
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::execution::{
    ExecutionContext, ExecutionStatus, WorkflowExecution,
};
use crate::engine::metrics::{ExecutionHistory, MonitoringSnapshot, ResourceUtilization};
use crate::engine::queue::{InMemoryQueue, MessageQueue, NackOutcome, QueueMessage};
use crate::engine::runner::{RunResult, StepRunner};
use crate::engine::store::{ExecutionFilter, ExecutionStore, InMemoryStore};
use crate::engine::transform::TransformRegistry;
use crate::engine::types::{
    QueueLane, TriggerEvent, WorkflowDefinition, WorkflowUpdate,
};
use crate::engine::validator;

/// Orchestrates workflow executions over a priority queue and a worker pool
pub struct WorkflowEngine {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    queue: Arc<dyn MessageQueue>,
    agents: AgentExecutor,
    transforms: TransformRegistry,
    webhook_breakers: BreakerRegistry,
    events: EventBus,
    http: reqwest::Client,
    history: std::sync::Mutex<ExecutionHistory>,
    /// Cancellation flags for executions currently held by a worker
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
    /// One permit per allowed concurrent execution; a worker holds its
    /// permit for the whole dequeue-to-settle span, so the cap is exact.
    capacity: Semaphore,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        let queue = InMemoryQueue::new(config.visibility_timeout, config.starvation_limit);
        Self {
            agents: AgentExecutor::new(config.breaker.clone()),
            transforms: TransformRegistry::builtin(),
            webhook_breakers: BreakerRegistry::new(config.breaker.clone()),
            events: EventBus::new(),
            http: reqwest::Client::new(),
            history: std::sync::Mutex::new(ExecutionHistory::default()),
            active: Mutex::new(HashMap::new()),
            capacity: Semaphore::new(config.max_concurrent_workflows),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            store: Arc::new(InMemoryStore::new()),
            queue: Arc::new(queue),
            config,
        }
    }

    /// Swap in a non-default store backend
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    /// Swap in a non-default queue backend
    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the transform registry (call before `start`)
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub async fn register_agent(&self, handler: Arc<dyn AgentHandler>) {
        self.agents.register(handler).await;
    }

    pub async fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<EngineEvent> {
        self.events.subscribe().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- workflow registry -------------------------------------------------

    /// Validate and store a workflow definition. Re-registering the same id
    /// overwrites the stored definition and preserves its creation time.
    pub async fn register_workflow(
        &self,
        mut definition: WorkflowDefinition,
    ) -> Result<(), EngineError> {
        validator::validate(&definition)?;
        if let Some(existing) = self.store.get_workflow(&definition.id).await? {
            definition.created_at = existing.created_at;
        }
        definition.updated_at = Utc::now();
        log::info!(
            "registered workflow '{}' v{} ({} steps)",
            definition.id,
            definition.version,
            definition.steps.len()
        );
        self.store.upsert_workflow(&definition).await
    }

    /// Apply a partial update, bump the version, and re-validate
    pub async fn update_workflow(
        &self,
        id: &str,
        update: WorkflowUpdate,
    ) -> Result<WorkflowDefinition, EngineError> {
        let mut definition = self
            .store
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", id))?;

        if let Some(name) = update.name {
            definition.name = name;
        }
        if let Some(steps) = update.steps {
            definition.steps = steps;
        }
        if let Some(triggers) = update.triggers {
            definition.triggers = triggers;
        }
        if let Some(retry_policy) = update.retry_policy {
            definition.retry_policy = Some(retry_policy);
        }
        if let Some(timeout_ms) = update.timeout_ms {
            definition.timeout_ms = Some(timeout_ms);
        }
        if let Some(priority) = update.priority {
            definition.priority = priority;
        }
        definition.version += 1;
        definition.updated_at = Utc::now();

        validator::validate(&definition)?;
        self.store.upsert_workflow(&definition).await?;
        Ok(definition)
    }

    /// Delete a workflow. Refused while it has QUEUED or RUNNING executions.
    pub async fn delete_workflow(&self, id: &str) -> Result<(), EngineError> {
        let active = self.store.count_active_executions(id).await?;
        if active > 0 {
            return Err(EngineError::Conflict(format!(
                "workflow '{}' has {} active execution(s)",
                id, active
            )));
        }
        if !self.store.delete_workflow(id).await? {
            return Err(EngineError::not_found("workflow", id));
        }
        log::info!("deleted workflow '{}'", id);
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<WorkflowDefinition, EngineError> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", id))
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        self.store.list_workflows().await
    }

    // ---- execution lifecycle ----------------------------------------------

    /// Queue one execution of a registered workflow. Returns the execution
    /// id immediately; a worker picks the run up asynchronously.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
        mut context: ExecutionContext,
    ) -> Result<String, EngineError> {
        let definition = self.get_workflow(workflow_id).await?;

        if context.trace_id.is_empty() {
            context.trace_id = Uuid::new_v4().to_string();
        }
        let execution =
            WorkflowExecution::queued(workflow_id, definition.version, input, context);
        self.store.upsert_execution(&execution).await?;

        let message = QueueMessage::workflow_execution(
            workflow_id,
            &execution.id,
            &execution.context.trace_id,
            definition.priority,
            self.config.message_max_retries,
        );
        self.queue.enqueue(message).await?;

        log::info!(
            "queued execution {} of workflow '{}' (trace {})",
            execution.id,
            workflow_id,
            execution.context.trace_id
        );
        self.events
            .emit(EngineEvent::WorkflowQueued {
                workflow_id: workflow_id.to_string(),
                execution_id: execution.id.clone(),
                trace_id: execution.context.trace_id.clone(),
            })
            .await;
        Ok(execution.id)
    }

    /// Cancel an execution. QUEUED executions are finalized immediately;
    /// RUNNING ones are asked to stop before their next step.
    pub async fn cancel_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        if let Some(flag) = self.active.lock().await.get(execution_id) {
            flag.store(true, Ordering::SeqCst);
            log::info!("cancellation requested for running execution {}", execution_id);
            return Ok(());
        }

        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", execution_id))?;
        if execution.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "execution '{}' already finished",
                execution_id
            )));
        }
        if !execution.transition_to(ExecutionStatus::Cancelled) {
            return Err(EngineError::Conflict(format!(
                "execution '{}' cannot be cancelled in state {:?}",
                execution_id, execution.status
            )));
        }
        self.store.upsert_execution(&execution).await?;
        self.events
            .emit(EngineEvent::WorkflowCancelled {
                workflow_id: execution.workflow_id.clone(),
                execution_id: execution.id.clone(),
                trace_id: execution.context.trace_id.clone(),
            })
            .await;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<WorkflowExecution, EngineError> {
        self.store
            .get_execution(id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", id))
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        self.store.list_executions(filter).await
    }

    /// Start one execution for every workflow with a matching event trigger.
    /// The event payload becomes each execution's input, and the event's
    /// trace id (when present) is propagated into all of them.
    pub async fn publish_event(&self, event: TriggerEvent) -> Result<Vec<String>, EngineError> {
        let trace_id = event
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut started = Vec::new();
        for definition in self.store.list_workflows().await? {
            if !definition.listens_for(&event.event_type) {
                continue;
            }
            let context = ExecutionContext {
                trace_id: trace_id.clone(),
                ..ExecutionContext::default()
            };
            let id = self
                .execute_workflow(&definition.id, event.payload.clone(), context)
                .await?;
            started.push(id);
        }
        log::info!(
            "event '{}' started {} execution(s)",
            event.event_type,
            started.len()
        );
        Ok(started)
    }

    // ---- monitoring --------------------------------------------------------

    pub async fn get_metrics(&self) -> MonitoringSnapshot {
        let mut queued = 0;
        for lane in QueueLane::ALL {
            queued += self.queue.stats(lane).await.size;
        }
        let active = self.active.lock().await.len();

        let (completed, failed, avg, throughput, error_rate) = {
            let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
            (
                history.completed_last_24h(),
                history.failed_last_24h(),
                history.avg_execution_time_ms(),
                history.throughput_last_hour(),
                history.error_rate(),
            )
        };

        MonitoringSnapshot {
            active_executions: active,
            queued_messages: queued,
            completed_last_24h: completed,
            failed_last_24h: failed,
            avg_execution_time_ms: avg,
            throughput_per_hour: throughput,
            error_rate,
            resources: ResourceUtilization {
                queue_depth_ratio: queued as f64 / self.config.queue_depth_soft_cap.max(1) as f64,
                worker_utilization: active as f64
                    / self.config.max_concurrent_workflows.max(1) as f64,
            },
        }
    }

    // ---- worker pool -------------------------------------------------------

    /// Spawn the worker pool and the periodic metrics loop
    pub async fn start(self: Arc<Self>) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.total_workers() {
            let engine = Arc::clone(&self);
            workers.push(tokio::spawn(async move {
                engine.worker_loop(worker_id).await;
            }));
        }
        let engine = Arc::clone(&self);
        workers.push(tokio::spawn(async move {
            engine.metrics_loop().await;
        }));
        log::info!("engine started with {} workers", self.config.total_workers());
        Ok(())
    }

    /// Stop accepting work and wait up to the shutdown grace period for
    /// active executions to drain. Executions still running afterwards are
    /// abandoned to visibility-timeout redelivery on the next start.
    pub async fn stop(&self) -> Result<(), EngineError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        let deadline = Instant::now() + self.config.shutdown_grace;
        while Instant::now() < deadline {
            if self.active.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        log::info!("engine stopped");
        Ok(())
    }

    async fn worker_loop(&self, worker_id: usize) {
        log::debug!("worker {} up", worker_id);
        while self.running.load(Ordering::SeqCst) {
            let _permit = match self.capacity.try_acquire() {
                Ok(permit) => permit,
                Err(_) => {
                    tokio::time::sleep(self.config.capacity_backoff).await;
                    continue;
                }
            };
            match self.queue.dequeue().await {
                Ok(Some(message)) => {
                    if let Err(err) = self.process_message(message).await {
                        log::error!("worker {}: {}", worker_id, err);
                    }
                }
                Ok(None) => {
                    // Idle: give the permit back before napping
                    drop(_permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    log::error!("worker {} dequeue failed: {}", worker_id, err);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn metrics_loop(&self) {
        loop {
            tokio::time::sleep(self.config.metrics_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let snapshot = self.get_metrics().await;
            self.events.emit(EngineEvent::Metrics(snapshot)).await;
        }
    }

    /// Drive one queued workflow-execution message to a queue decision
    /// (ack, requeue or dead-letter).
    async fn process_message(&self, message: QueueMessage) -> Result<(), EngineError> {
        let execution_id = match &message.metadata.execution_id {
            Some(id) => id.clone(),
            None => {
                log::warn!("message {} carries no execution id", message.id);
                return self.queue.ack(&message.id).await;
            }
        };

        let mut execution = match self.store.get_execution(&execution_id).await? {
            Some(execution) => execution,
            None => {
                log::warn!("execution {} not found, dropping message", execution_id);
                return self.queue.ack(&message.id).await;
            }
        };
        // Cancelled-while-queued, or a duplicate delivery of finished work
        if execution.status.is_terminal() {
            return self.queue.ack(&message.id).await;
        }

        let definition = match self.store.get_workflow(&execution.workflow_id).await? {
            Some(definition) => definition,
            None => {
                self.finalize(
                    &mut execution,
                    ExecutionStatus::Failed,
                    None,
                    Some("workflow definition no longer exists".to_string()),
                )
                .await?;
                return self.queue.ack(&message.id).await;
            }
        };
        if definition.version != execution.workflow_version {
            log::warn!(
                "execution {} pinned to v{} but store has v{}; running current version",
                execution.id,
                execution.workflow_version,
                definition.version
            );
        }

        // Registered before the RUNNING transition is visible, so a cancel
        // request can never slip between the two.
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.active
            .lock()
            .await
            .insert(execution.id.clone(), Arc::clone(&cancel_flag));

        if execution.status == ExecutionStatus::Queued {
            execution.transition_to(ExecutionStatus::Running);
            self.store.upsert_execution(&execution).await?;
            self.events
                .emit(EngineEvent::WorkflowStarted {
                    workflow_id: execution.workflow_id.clone(),
                    execution_id: execution.id.clone(),
                    trace_id: execution.context.trace_id.clone(),
                })
                .await;
        } else {
            // Redelivery after a retryable failure re-runs from the start;
            // earlier step records stay on the execution as attempt history.
            log::info!(
                "redelivery {} of execution {} (retry {}/{})",
                message.id,
                execution.id,
                message.metadata.retry_count,
                message.metadata.max_retries
            );
        }

        let result = self
            .run_to_completion(&definition, &mut execution, &cancel_flag)
            .await;

        self.active.lock().await.remove(&execution.id);

        match result {
            Outcome::Completed(output) => {
                self.finalize(&mut execution, ExecutionStatus::Completed, Some(output), None)
                    .await?;
                self.queue.ack(&message.id).await
            }
            Outcome::Cancelled => {
                self.finalize(&mut execution, ExecutionStatus::Cancelled, None, None)
                    .await?;
                self.queue.ack(&message.id).await
            }
            Outcome::TimedOut => {
                self.finalize(
                    &mut execution,
                    ExecutionStatus::TimedOut,
                    None,
                    Some("execution exceeded its timeout".to_string()),
                )
                .await?;
                self.queue.ack(&message.id).await
            }
            Outcome::Failed(err) if err.is_retryable() => {
                // Keep the execution RUNNING and let the queue decide:
                // requeue within budget, dead-letter beyond it.
                self.store.upsert_execution(&execution).await?;
                match self.queue.nack(&message.id, true).await? {
                    NackOutcome::Requeued => {
                        log::warn!(
                            "execution {} failed retryably, message requeued: {}",
                            execution.id,
                            err
                        );
                        Ok(())
                    }
                    NackOutcome::DeadLettered => {
                        self.events
                            .emit(EngineEvent::MessageDeadLettered {
                                message_id: message.id.clone(),
                                workflow_id: execution.workflow_id.clone(),
                                trace_id: execution.context.trace_id.clone(),
                            })
                            .await;
                        self.finalize(
                            &mut execution,
                            ExecutionStatus::Failed,
                            None,
                            Some(err.to_string()),
                        )
                        .await
                    }
                }
            }
            Outcome::Failed(err) => {
                self.finalize(
                    &mut execution,
                    ExecutionStatus::Failed,
                    None,
                    Some(err.to_string()),
                )
                .await?;
                self.queue.ack(&message.id).await
            }
        }
    }

    async fn run_to_completion(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        cancel_flag: &AtomicBool,
    ) -> Outcome {
        let runner = StepRunner {
            agents: &self.agents,
            transforms: &self.transforms,
            webhook_breakers: &self.webhook_breakers,
            events: &self.events,
            http: &self.http,
            default_retry: &self.config.default_retry_policy,
        };
        let budget = definition
            .timeout_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(self.config.default_workflow_timeout);

        match tokio::time::timeout(budget, runner.run(definition, execution, cancel_flag)).await {
            Ok(RunResult::Completed(output)) => Outcome::Completed(output),
            Ok(RunResult::Cancelled) => Outcome::Cancelled,
            Ok(RunResult::Failed(err)) => Outcome::Failed(err),
            Err(_) => Outcome::TimedOut,
        }
    }

    /// Move an execution to a terminal status, persist it and emit the
    /// matching event.
    async fn finalize(
        &self,
        execution: &mut WorkflowExecution,
        status: ExecutionStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        execution.output = output;
        execution.error = error.clone();
        // A QUEUED execution finalized without ever running (e.g. its
        // definition vanished) still passes through RUNNING.
        if execution.status == ExecutionStatus::Queued && status != ExecutionStatus::Cancelled {
            execution.transition_to(ExecutionStatus::Running);
        }
        if !execution.transition_to(status) {
            log::warn!(
                "execution {} refused transition {:?} -> {:?}",
                execution.id,
                execution.status,
                status
            );
            return self.store.upsert_execution(execution).await;
        }
        self.store.upsert_execution(execution).await?;

        let workflow_id = execution.workflow_id.clone();
        let execution_id = execution.id.clone();
        let trace_id = execution.context.trace_id.clone();
        let event = match status {
            ExecutionStatus::Completed => {
                self.history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_completion(execution.duration_ms.unwrap_or(0));
                EngineEvent::WorkflowCompleted {
                    workflow_id,
                    execution_id,
                    trace_id,
                    duration_ms: execution.duration_ms.unwrap_or(0),
                }
            }
            ExecutionStatus::Failed => {
                self.history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_failure();
                EngineEvent::WorkflowFailed {
                    workflow_id,
                    execution_id,
                    trace_id,
                    error: error.unwrap_or_default(),
                }
            }
            ExecutionStatus::TimedOut => {
                self.history
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .record_failure();
                EngineEvent::WorkflowTimedOut {
                    workflow_id,
                    execution_id,
                    trace_id,
                }
            }
            ExecutionStatus::Cancelled => EngineEvent::WorkflowCancelled {
                workflow_id,
                execution_id,
                trace_id,
            },
            _ => return Ok(()),
        };
        self.events.emit(event).await;
        Ok(())
    }
}

enum Outcome {
    Completed(Value),
    Cancelled,
    TimedOut,
    Failed(EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::agent::AgentRequest;
    use crate::engine::types::{StepKind, Trigger, WorkflowPriority, WorkflowStep};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl AgentHandler for EchoHandler {
        fn agent_type(&self) -> &str {
            "echo"
        }
        async fn execute(&self, request: &AgentRequest) -> Result<Value, EngineError> {
            Ok(request.input.clone())
        }
    }

    fn step(id: &str, kind: StepKind, deps: Vec<&str>) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            name: id.to_string(),
            kind,
            dependencies: deps.into_iter().map(String::from).collect(),
            condition: None,
            retry_policy: None,
            timeout_ms: None,
        }
    }

    fn echo_workflow(id: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            version: 1,
            steps: vec![step(
                "echo",
                StepKind::Agent {
                    agent_type: "echo".to_string(),
                    options: Value::Null,
                },
                vec![],
            )],
            triggers: vec![Trigger::Manual],
            retry_policy: None,
            timeout_ms: None,
            priority: WorkflowPriority::Medium,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fast_engine() -> Arc<WorkflowEngine> {
        let config = EngineConfig {
            poll_interval: Duration::from_millis(5),
            metrics_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(2),
            ..EngineConfig::default()
        };
        Arc::new(WorkflowEngine::new(config))
    }

    async fn wait_terminal(engine: &WorkflowEngine, id: &str) -> WorkflowExecution {
        for _ in 0..400 {
            let execution = engine.get_execution(id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_register_rejects_cycles() {
        let engine = fast_engine();
        let mut wf = echo_workflow("wf-cycle");
        wf.steps = vec![
            step("a", StepKind::Parallel {}, vec!["b"]),
            step("b", StepKind::Parallel {}, vec!["a"]),
        ];
        let err = engine.register_workflow(wf).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let engine = fast_engine();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        assert_eq!(engine.list_workflows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_revalidates() {
        let engine = fast_engine();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();

        let updated = engine
            .update_workflow(
                "wf-1",
                WorkflowUpdate {
                    name: Some("renamed".to_string()),
                    ..WorkflowUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "renamed");

        let err = engine
            .update_workflow(
                "wf-1",
                WorkflowUpdate {
                    steps: Some(vec![step("a", StepKind::Parallel {}, vec!["ghost"])]),
                    ..WorkflowUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        // Failed update leaves the stored definition untouched
        assert_eq!(engine.get_workflow("wf-1").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_delete_with_queued_execution_conflicts() {
        let engine = fast_engine();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        engine
            .execute_workflow("wf-1", json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let err = engine.delete_workflow("wf-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_execute_unknown_workflow() {
        let engine = fast_engine();
        let err = engine
            .execute_workflow("ghost", json!({}), ExecutionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_queued_execution() {
        let engine = fast_engine();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        let id = engine
            .execute_workflow("wf-1", json!({}), ExecutionContext::default())
            .await
            .unwrap();

        engine.cancel_execution(&id).await.unwrap();
        let execution = engine.get_execution(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);

        // Cancelling a finished execution conflicts
        let err = engine.cancel_execution(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_worker_completes_queued_execution() {
        let engine = fast_engine();
        engine.register_agent(Arc::new(EchoHandler)).await;
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        engine.clone().start().await.unwrap();

        let id = engine
            .execute_workflow("wf-1", json!({"n": 7}), ExecutionContext::default())
            .await
            .unwrap();
        let execution = wait_terminal(&engine, &id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.output, Some(json!({"n": 7})));
        assert!(execution.duration_ms.is_some());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_is_skipped_by_workers() {
        let engine = fast_engine();
        engine.register_agent(Arc::new(EchoHandler)).await;
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();

        // Cancel before any worker exists, then start the pool
        let id = engine
            .execute_workflow("wf-1", json!({}), ExecutionContext::default())
            .await
            .unwrap();
        engine.cancel_execution(&id).await.unwrap();
        engine.clone().start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let execution = engine.get_execution(&id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert!(execution.steps.is_empty());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_cap_bounds_active_executions() {
        let config = EngineConfig {
            max_concurrent_workflows: 1,
            poll_interval: Duration::from_millis(5),
            capacity_backoff: Duration::from_millis(5),
            metrics_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(2),
            ..EngineConfig::default()
        };
        let engine = Arc::new(WorkflowEngine::new(config));
        let mut wf = echo_workflow("wf-slow");
        wf.steps = vec![step(
            "wait",
            StepKind::Delay { duration_ms: 50 },
            vec![],
        )];
        engine.register_workflow(wf).await.unwrap();
        engine.clone().start().await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                engine
                    .execute_workflow("wf-slow", json!({}), ExecutionContext::default())
                    .await
                    .unwrap(),
            );
        }

        // Sample while the backlog drains: the cap must never be exceeded
        let mut max_active = 0;
        for _ in 0..400 {
            let snapshot = engine.get_metrics().await;
            max_active = max_active.max(snapshot.active_executions);

            let mut finished = 0;
            for id in &ids {
                if engine.get_execution(id).await.unwrap().status.is_terminal() {
                    finished += 1;
                }
            }
            if finished == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(max_active, 1);
        for id in &ids {
            let execution = engine.get_execution(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Completed);
        }

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_event_starts_matching_workflows() {
        let engine = fast_engine();
        let mut wf = echo_workflow("wf-listener");
        wf.triggers = vec![Trigger::Event {
            event_type: "file.imported".to_string(),
        }];
        engine.register_workflow(wf).await.unwrap();
        engine.register_workflow(echo_workflow("wf-manual")).await.unwrap();

        let started = engine
            .publish_event(TriggerEvent {
                event_type: "file.imported".to_string(),
                payload: json!({"path": "/tmp/x"}),
                trace_id: Some("trace-42".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(started.len(), 1);

        let execution = engine.get_execution(&started[0]).await.unwrap();
        assert_eq!(execution.workflow_id, "wf-listener");
        assert_eq!(execution.context.trace_id, "trace-42");
        assert_eq!(execution.input, json!({"path": "/tmp/x"}));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let engine = fast_engine();
        assert!(matches!(
            engine.stop().await.unwrap_err(),
            EngineError::NotRunning
        ));
    }

    #[tokio::test]
    async fn test_metrics_reflect_queue_depth() {
        let engine = fast_engine();
        engine.register_workflow(echo_workflow("wf-1")).await.unwrap();
        engine
            .execute_workflow("wf-1", json!({}), ExecutionContext::default())
            .await
            .unwrap();

        let snapshot = engine.get_metrics().await;
        assert_eq!(snapshot.queued_messages, 1);
        assert_eq!(snapshot.active_executions, 0);
        assert!(snapshot.resources.queue_depth_ratio > 0.0);
    }
}
