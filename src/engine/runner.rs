// SPDX-License-Identifier: MIT

//! Per-execution step loop
//!
//! Steps are visited in declaration order; a step whose dependencies are not
//! yet complete is deferred to the next pass. A false gating condition skips
//! the step, and skipped steps satisfy downstream dependencies. Any step
//! failure aborts the whole execution — there is no partial-success or
//! parallel-branch continuation.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::engine::agent::{AgentExecutor, AgentRequest};
use crate::engine::breaker::BreakerRegistry;
use crate::engine::condition;
use crate::engine::error::EngineError;
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::execution::{StepExecution, StepStatus, WorkflowExecution};
use crate::engine::transform::TransformRegistry;
use crate::engine::types::{RetryPolicy, StepKind, WorkflowDefinition, WorkflowStep};

/// How one pass over an execution ended
pub enum RunResult {
    Completed(Value),
    Failed(EngineError),
    Cancelled,
}

/// Executes step bodies for one engine instance
pub struct StepRunner<'a> {
    pub agents: &'a AgentExecutor,
    pub transforms: &'a TransformRegistry,
    pub webhook_breakers: &'a BreakerRegistry,
    pub events: &'a EventBus,
    pub http: &'a reqwest::Client,
    pub default_retry: &'a RetryPolicy,
}

impl<'a> StepRunner<'a> {
    /// Drive all steps of one execution, mutating its step records in place.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        cancelled: &AtomicBool,
    ) -> RunResult {
        let context_value = execution.context.to_value();
        let trace_id = execution.context.trace_id.clone();
        let mut current = execution.input.clone();
        let mut done: HashSet<String> = HashSet::new();

        loop {
            let mut progressed = false;
            let mut deferred = false;

            for step in &definition.steps {
                if done.contains(&step.id) {
                    continue;
                }
                // Cooperative cancellation: never start another step
                if cancelled.load(Ordering::SeqCst) {
                    return RunResult::Cancelled;
                }
                if !step.dependencies.iter().all(|d| done.contains(d)) {
                    deferred = true;
                    continue;
                }

                if let Some(cond) = &step.condition {
                    match condition::evaluate_str(&cond.expression, &current, &context_value) {
                        Ok(true) => {}
                        Ok(false) => {
                            let reason = format!("condition '{}' evaluated to false", cond.expression);
                            log::info!("step {} skipped: {}", step.id, reason);
                            execution
                                .steps
                                .push(StepExecution::skipped(&step.id, current.clone(), &reason));
                            self.events
                                .emit(EngineEvent::StepSkipped {
                                    execution_id: execution.id.clone(),
                                    step_id: step.id.clone(),
                                    trace_id: trace_id.clone(),
                                    reason,
                                })
                                .await;
                            done.insert(step.id.clone());
                            execution.metrics.step_count += 1;
                            progressed = true;
                            continue;
                        }
                        Err(err) => {
                            let mut record = StepExecution::started(&step.id, current.clone(), 1);
                            record.finish(StepStatus::Failed, None, Some(err.to_string()));
                            execution.steps.push(record);
                            execution.metrics.step_count += 1;
                            return self.fail(execution, &step.id, &trace_id, err).await;
                        }
                    }
                }

                match self
                    .run_step_with_retry(step, definition, execution, &current, &context_value)
                    .await
                {
                    Ok(output) => {
                        self.events
                            .emit(EngineEvent::StepCompleted {
                                execution_id: execution.id.clone(),
                                step_id: step.id.clone(),
                                trace_id: trace_id.clone(),
                            })
                            .await;
                        current = output;
                        done.insert(step.id.clone());
                        progressed = true;
                    }
                    Err(err) => {
                        return self.fail(execution, &step.id, &trace_id, err).await;
                    }
                }
            }

            if !deferred {
                break;
            }
            if !progressed {
                // Remaining steps can never run; validation should prevent
                // this, but a stalled graph must not spin forever. They are
                // recorded SKIPPED rather than silently dropped.
                for step in &definition.steps {
                    if !done.contains(&step.id) {
                        log::warn!(
                            "step {} unreachable: dependencies never satisfied",
                            step.id
                        );
                        execution.steps.push(StepExecution::skipped(
                            &step.id,
                            current.clone(),
                            "dependencies never satisfied",
                        ));
                        execution.metrics.step_count += 1;
                        done.insert(step.id.clone());
                    }
                }
                break;
            }
        }

        RunResult::Completed(current)
    }

    async fn fail(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        trace_id: &str,
        err: EngineError,
    ) -> RunResult {
        self.events
            .emit(EngineEvent::StepFailed {
                execution_id: execution.id.clone(),
                step_id: step_id.to_string(),
                trace_id: trace_id.to_string(),
                error: err.to_string(),
            })
            .await;
        RunResult::Failed(err)
    }

    /// Run one step body, honoring its retry policy and timeout. The step
    /// record is appended to the execution whatever the outcome.
    async fn run_step_with_retry(
        &self,
        step: &WorkflowStep,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        current: &Value,
        context: &Value,
    ) -> Result<Value, EngineError> {
        let policy = step
            .retry_policy
            .as_ref()
            .or(definition.retry_policy.as_ref())
            .unwrap_or(self.default_retry);
        let max_attempts = policy.max_attempts.max(1);

        let mut record = StepExecution::started(&step.id, current.clone(), 1);
        execution.metrics.step_count += 1;

        let mut attempt = 1;
        loop {
            record.attempt = attempt;
            let result = match step.timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(
                        Duration::from_millis(ms),
                        self.execute_body(step, current, context),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::step(
                            &step.id,
                            format!("step timed out after {}ms", ms),
                            true,
                        )),
                    }
                }
                None => self.execute_body(step, current, context).await,
            };

            match result {
                Ok(output) => {
                    record.logs.push(format!("attempt {} succeeded", attempt));
                    record.finish(StepStatus::Completed, Some(output.clone()), None);
                    execution.steps.push(record);
                    return Ok(output);
                }
                Err(err) => {
                    log::warn!("step {} attempt {} failed: {}", step.id, attempt, err);
                    record.logs.push(format!("attempt {} failed: {}", attempt, err));

                    // Every failure crossing this boundary becomes a step
                    // execution error; nothing propagates as a panic.
                    let err = normalize_step_error(&step.id, err);
                    if attempt < max_attempts && err.is_retryable() {
                        record.status = StepStatus::Retrying;
                        execution.metrics.retry_count += 1;
                        tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    record.finish(StepStatus::Failed, None, Some(err.to_string()));
                    execution.steps.push(record);
                    return Err(err);
                }
            }
        }
    }

    async fn execute_body(
        &self,
        step: &WorkflowStep,
        current: &Value,
        context: &Value,
    ) -> Result<Value, EngineError> {
        match &step.kind {
            StepKind::Agent {
                agent_type,
                options,
            } => {
                let request = AgentRequest {
                    agent_type: agent_type.clone(),
                    input: current.clone(),
                    context: context.clone(),
                    config: options.clone(),
                };
                let response = self.agents.execute(&request).await?;
                Ok(response.output.unwrap_or(Value::Null))
            }
            StepKind::Transform { name, options } => {
                self.transforms.apply(name, current, options)
            }
            StepKind::Condition { expression } => {
                let result = condition::evaluate_str(expression, current, context)?;
                Ok(Value::Bool(result))
            }
            StepKind::Parallel {} => Ok(current.clone()),
            StepKind::Delay { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
                Ok(current.clone())
            }
            StepKind::Webhook {
                url,
                method,
                headers,
                body,
            } => {
                let breaker = self
                    .webhook_breakers
                    .get_or_create(&format!("webhook:{}", step.id))
                    .await;
                let http = self.http;
                let payload = body.clone().unwrap_or_else(|| current.clone());
                breaker
                    .execute(|| async move {
                        let method: reqwest::Method = method
                            .parse()
                            .map_err(|_| {
                                EngineError::step(
                                    &step.id,
                                    format!("invalid webhook method '{}'", method),
                                    false,
                                )
                            })?;
                        let mut request = http.request(method.clone(), url.as_str());
                        for (key, value) in headers {
                            request = request.header(key, value);
                        }
                        if method != reqwest::Method::GET {
                            request = request.json(&payload);
                        }
                        let response = request.send().await?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(EngineError::step(
                                &step.id,
                                format!("webhook returned {}", status),
                                status.is_server_error(),
                            ));
                        }
                        Ok(response.json::<Value>().await?)
                    })
                    .await
            }
        }
    }
}

/// Map infrastructure errors to the step-failure taxonomy, preserving
/// retryability. Circuit-open surfaces as a retryable step failure.
fn normalize_step_error(step_id: &str, err: EngineError) -> EngineError {
    match err {
        e @ EngineError::StepExecution { .. } => e,
        e @ EngineError::Eval(_) | e @ EngineError::Transform(_) => e,
        EngineError::CircuitOpen { breaker } => EngineError::step(
            step_id,
            format!("circuit breaker '{}' is open", breaker),
            true,
        ),
        EngineError::UnknownAgent { agent_type } => EngineError::step(
            step_id,
            format!("unknown agent type '{}'", agent_type),
            false,
        ),
        other => {
            let retryable = other.is_retryable();
            EngineError::step(step_id, other.to_string(), retryable)
        }
    }
}
