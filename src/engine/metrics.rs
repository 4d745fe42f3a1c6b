// SPDX-License-Identifier: MIT

//! Rolling aggregates behind `get_metrics`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Completed/failed outcomes remembered for rolling-window calculations
const ROLLING_DURATIONS: usize = 100;

/// Coarse resource view included in the snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Ready messages across all lanes divided by the queue-depth soft cap
    pub queue_depth_ratio: f64,
    /// Active executions divided by `max_concurrent_workflows`
    pub worker_utilization: f64,
}

/// Point-in-time monitoring data returned by `WorkflowEngine::get_metrics`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MonitoringSnapshot {
    pub active_executions: usize,
    pub queued_messages: usize,
    pub completed_last_24h: usize,
    pub failed_last_24h: usize,
    /// Mean duration of the last 100 completed executions, milliseconds
    pub avg_execution_time_ms: f64,
    /// Completions plus failures over the past hour
    pub throughput_per_hour: usize,
    /// failed / (completed + failed) over the past 24 hours
    pub error_rate: f64,
    pub resources: ResourceUtilization,
}

/// Mutable history the engine updates as executions finish
#[derive(Default)]
pub struct ExecutionHistory {
    completions: VecDeque<(DateTime<Utc>, u64)>,
    failures: VecDeque<DateTime<Utc>>,
}

impl ExecutionHistory {
    pub fn record_completion(&mut self, duration_ms: u64) {
        self.completions.push_back((Utc::now(), duration_ms));
        // Durations participate in the rolling average; timestamps in the
        // 24h counters. Trim on the longer horizon only.
        self.trim();
    }

    pub fn record_failure(&mut self) {
        self.failures.push_back(Utc::now());
        self.trim();
    }

    fn trim(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        while self
            .completions
            .front()
            .map(|(t, _)| *t < cutoff && self.completions.len() > ROLLING_DURATIONS)
            .unwrap_or(false)
        {
            self.completions.pop_front();
        }
        while self.failures.front().map(|t| *t < cutoff).unwrap_or(false) {
            self.failures.pop_front();
        }
    }

    pub fn completed_last_24h(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.completions.iter().filter(|(t, _)| *t >= cutoff).count()
    }

    pub fn failed_last_24h(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        self.failures.iter().filter(|t| **t >= cutoff).count()
    }

    pub fn avg_execution_time_ms(&self) -> f64 {
        let recent: Vec<u64> = self
            .completions
            .iter()
            .rev()
            .take(ROLLING_DURATIONS)
            .map(|(_, d)| *d)
            .collect();
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().sum::<u64>() as f64 / recent.len() as f64
    }

    pub fn throughput_last_hour(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        self.completions.iter().filter(|(t, _)| *t >= cutoff).count()
            + self.failures.iter().filter(|t| **t >= cutoff).count()
    }

    pub fn error_rate(&self) -> f64 {
        let completed = self.completed_last_24h();
        let failed = self.failed_last_24h();
        let total = completed + failed;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        let history = ExecutionHistory::default();
        assert_eq!(history.avg_execution_time_ms(), 0.0);
        assert_eq!(history.error_rate(), 0.0);
        assert_eq!(history.throughput_last_hour(), 0);
    }

    #[test]
    fn test_rolling_average() {
        let mut history = ExecutionHistory::default();
        history.record_completion(100);
        history.record_completion(300);
        assert_eq!(history.avg_execution_time_ms(), 200.0);
    }

    #[test]
    fn test_rolling_average_caps_at_last_100() {
        let mut history = ExecutionHistory::default();
        for _ in 0..100 {
            history.record_completion(0);
        }
        for _ in 0..100 {
            history.record_completion(100);
        }
        // Only the newest 100 count
        assert_eq!(history.avg_execution_time_ms(), 100.0);
    }

    #[test]
    fn test_error_rate() {
        let mut history = ExecutionHistory::default();
        history.record_completion(10);
        history.record_completion(10);
        history.record_failure();
        history.record_failure();
        assert_eq!(history.error_rate(), 0.5);
        assert_eq!(history.throughput_last_hour(), 4);
        assert_eq!(history.completed_last_24h(), 2);
        assert_eq!(history.failed_last_24h(), 2);
    }
}
