// SPDX-License-Identifier: MIT

//! Engine tuning parameters

use std::time::Duration;

use crate::engine::breaker::BreakerConfig;
use crate::engine::types::RetryPolicy;

/// Tuning knobs for one `WorkflowEngine` instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker tasks per lane, highest priority first: critical, high,
    /// normal, background. All workers drain the queue in priority order;
    /// the weights set how much total pull capacity each lane adds.
    pub lane_workers: [usize; 4],
    /// Global cap on executions processed concurrently across all lanes
    pub max_concurrent_workflows: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// Sleep before re-checking when the concurrency cap is reached
    pub capacity_backoff: Duration,
    /// How long a dequeued message stays invisible before redelivery
    pub visibility_timeout: Duration,
    /// Dequeues a non-empty lane may be passed over before it is served
    pub starvation_limit: u32,
    /// Queue message retry budget for retryable execution failures
    pub message_max_retries: u32,
    /// Soft queue-depth cap used only for the utilization ratio in metrics
    pub queue_depth_soft_cap: usize,
    /// Interval of the periodic metrics emission loop
    pub metrics_interval: Duration,
    /// How long `stop` waits for active executions to drain
    pub shutdown_grace: Duration,
    /// Fallback step retry policy when neither step nor workflow sets one
    pub default_retry_policy: RetryPolicy,
    /// Default breaker settings for agent and webhook dependencies
    pub breaker: BreakerConfig,
    /// Wall-clock budget for executions whose definition sets no timeout
    pub default_workflow_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lane_workers: [4, 3, 2, 1],
            max_concurrent_workflows: 16,
            poll_interval: Duration::from_millis(50),
            capacity_backoff: Duration::from_millis(100),
            visibility_timeout: Duration::from_secs(30),
            starvation_limit: 8,
            message_max_retries: 3,
            queue_depth_soft_cap: 1000,
            metrics_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            default_retry_policy: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            default_workflow_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    pub fn total_workers(&self) -> usize {
        self.lane_workers.iter().sum()
    }
}
