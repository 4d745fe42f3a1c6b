// SPDX-License-Identifier: MIT

//! In-memory priority queue
//!
//! Dequeue services the four lanes in strict priority order. Every time a
//! non-empty lane is passed over in favor of a higher one, its skip counter
//! grows; once the counter reaches `starvation_limit` that lane is served
//! next regardless of priority, so sustained critical load cannot starve the
//! background lane forever.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::message::QueueMessage;
use super::{MessageQueue, NackOutcome, QueueStats};
use crate::engine::error::EngineError;
use crate::engine::types::QueueLane;

struct InFlight {
    message: QueueMessage,
    redelivery_at: Instant,
}

#[derive(Default)]
struct LaneState {
    ready: VecDeque<QueueMessage>,
    /// Dequeues that served a higher lane while this one had work
    passed_over: u32,
    /// Dead-lettered from this lane since startup
    failed: usize,
}

struct QueueInner {
    lanes: HashMap<QueueLane, LaneState>,
    in_flight: HashMap<String, InFlight>,
    dead: Vec<QueueMessage>,
}

/// Default in-process queue backend
pub struct InMemoryQueue {
    inner: Mutex<QueueInner>,
    visibility_timeout: Duration,
    starvation_limit: u32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, starvation_limit: u32) -> Self {
        let mut lanes = HashMap::new();
        for lane in QueueLane::ALL {
            lanes.insert(lane, LaneState::default());
        }
        Self {
            inner: Mutex::new(QueueInner {
                lanes,
                in_flight: HashMap::new(),
                dead: Vec::new(),
            }),
            visibility_timeout,
            starvation_limit,
        }
    }

    /// Put expired unacked deliveries back at the front of their lanes
    fn sweep_expired(inner: &mut QueueInner, now: Instant) {
        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.redelivery_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(flight) = inner.in_flight.remove(&id) {
                log::warn!(
                    "message {} exceeded visibility timeout, redelivering",
                    flight.message.id
                );
                let lane = flight.message.lane();
                if let Some(state) = inner.lanes.get_mut(&lane) {
                    state.ready.push_front(flight.message);
                }
            }
        }
    }

    /// Pick the lane to serve: highest-priority lane with a due message,
    /// unless a starving lower lane has waited long enough.
    fn choose_lane(inner: &QueueInner, starvation_limit: u32) -> Option<QueueLane> {
        let now = Utc::now();
        let has_due = |lane: QueueLane| {
            inner
                .lanes
                .get(&lane)
                .map(|s| s.ready.iter().any(|m| m.is_due(now)))
                .unwrap_or(false)
        };

        let first_due = QueueLane::ALL.into_iter().find(|&lane| has_due(lane))?;

        // A lower lane that has been passed over too often goes first.
        let starving = QueueLane::ALL
            .into_iter()
            .filter(|&lane| lane > first_due && has_due(lane))
            .find(|lane| inner.lanes[lane].passed_over >= starvation_limit);

        Some(starving.unwrap_or(first_due))
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 8)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let lane = message.lane();
        log::debug!(
            "enqueue message {} on lane {} (trace {})",
            message.id,
            lane.as_str(),
            message.metadata.trace_id
        );
        if let Some(state) = inner.lanes.get_mut(&lane) {
            state.ready.push_back(message);
        }
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueueMessage>, EngineError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::sweep_expired(&mut inner, now);

        let Some(lane) = Self::choose_lane(&inner, self.starvation_limit) else {
            return Ok(None);
        };

        // Bump skip counters on the due lanes below the one we serve.
        let wall_now = Utc::now();
        for other in QueueLane::ALL {
            if other > lane {
                if let Some(state) = inner.lanes.get_mut(&other) {
                    if state.ready.iter().any(|m| m.is_due(wall_now)) {
                        state.passed_over += 1;
                    }
                }
            }
        }

        let state = inner
            .lanes
            .get_mut(&lane)
            .ok_or_else(|| EngineError::validation("unknown queue lane"))?;
        state.passed_over = 0;

        let pos = state.ready.iter().position(|m| m.is_due(wall_now));
        let message = match pos {
            Some(pos) => state.ready.remove(pos),
            None => None,
        };

        if let Some(message) = message {
            inner.in_flight.insert(
                message.id.clone(),
                InFlight {
                    message: message.clone(),
                    redelivery_at: now + self.visibility_timeout,
                },
            );
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    async fn ack(&self, message_id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight.remove(message_id).is_none() {
            log::warn!("ack for unknown or already-settled message {}", message_id);
        }
        Ok(())
    }

    async fn nack(&self, message_id: &str, requeue: bool) -> Result<NackOutcome, EngineError> {
        let mut inner = self.inner.lock().await;
        let Some(flight) = inner.in_flight.remove(message_id) else {
            return Err(EngineError::not_found("message", message_id));
        };
        let mut message = flight.message;
        let lane = message.lane();

        if requeue {
            message.metadata.retry_count += 1;
            if message.metadata.retry_count <= message.metadata.max_retries {
                log::info!(
                    "requeue message {} (retry {}/{})",
                    message.id,
                    message.metadata.retry_count,
                    message.metadata.max_retries
                );
                if let Some(state) = inner.lanes.get_mut(&lane) {
                    state.ready.push_back(message);
                }
                return Ok(NackOutcome::Requeued);
            }
        }

        // Permanently failed unit of work; this transition must be visible.
        log::warn!(
            "message {} dead-lettered after {} retries (trace {})",
            message.id,
            message.metadata.retry_count,
            message.metadata.trace_id
        );
        if let Some(state) = inner.lanes.get_mut(&lane) {
            state.failed += 1;
        }
        inner.dead.push(message);
        Ok(NackOutcome::DeadLettered)
    }

    async fn stats(&self, lane: QueueLane) -> QueueStats {
        let inner = self.inner.lock().await;
        let state = &inner.lanes[&lane];
        QueueStats {
            size: state.ready.len(),
            processing: inner
                .in_flight
                .values()
                .filter(|f| f.message.lane() == lane)
                .count(),
            failed: state.failed,
        }
    }

    async fn dead_letters(&self) -> Vec<QueueMessage> {
        self.inner.lock().await.dead.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::WorkflowPriority;

    fn msg(priority: WorkflowPriority, max_retries: u32) -> QueueMessage {
        QueueMessage::workflow_execution(
            "wf",
            &uuid::Uuid::new_v4().to_string(),
            "trace",
            priority,
            max_retries,
        )
    }

    fn quick_queue() -> InMemoryQueue {
        InMemoryQueue::new(Duration::from_secs(30), 3)
    }

    #[tokio::test]
    async fn test_critical_dequeued_before_background() {
        let queue = quick_queue();
        let background = msg(WorkflowPriority::Background, 0);
        let critical = msg(WorkflowPriority::Critical, 0);

        // Background enqueued first; critical must still come out first
        queue.enqueue(background.clone()).await.unwrap();
        queue.enqueue(critical.clone()).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, critical.id);
        let second = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(second.id, background.id);
    }

    #[tokio::test]
    async fn test_strict_priority_across_all_lanes() {
        let queue = quick_queue();
        let b = msg(WorkflowPriority::Background, 0);
        let n = msg(WorkflowPriority::Medium, 0);
        let h = msg(WorkflowPriority::High, 0);
        let c = msg(WorkflowPriority::Critical, 0);
        for m in [&b, &n, &h, &c] {
            queue.enqueue((*m).clone()).await.unwrap();
        }

        let order: Vec<String> = [
            queue.dequeue().await.unwrap().unwrap().id,
            queue.dequeue().await.unwrap().unwrap().id,
            queue.dequeue().await.unwrap().unwrap().id,
            queue.dequeue().await.unwrap().unwrap().id,
        ]
        .to_vec();
        assert_eq!(order, vec![c.id, h.id, n.id, b.id]);
    }

    #[tokio::test]
    async fn test_background_not_starved_under_critical_load() {
        let queue = InMemoryQueue::new(Duration::from_secs(30), 3);
        let background = msg(WorkflowPriority::Background, 0);
        queue.enqueue(background.clone()).await.unwrap();
        for _ in 0..20 {
            queue.enqueue(msg(WorkflowPriority::Critical, 0)).await.unwrap();
        }

        // With a starvation limit of 3, the background message must appear
        // within the first handful of dequeues despite waiting critical work.
        let mut served_background_at = None;
        for i in 0..6 {
            let m = queue.dequeue().await.unwrap().unwrap();
            queue.ack(&m.id).await.unwrap();
            if m.id == background.id {
                served_background_at = Some(i);
                break;
            }
        }
        assert_eq!(served_background_at, Some(3));
    }

    #[tokio::test]
    async fn test_dead_letter_after_retry_budget() {
        let queue = quick_queue();
        let message = msg(WorkflowPriority::Medium, 2);
        queue.enqueue(message.clone()).await.unwrap();

        // Failure 1 and 2: requeued
        for expected_retry in 1..=2u32 {
            let m = queue.dequeue().await.unwrap().unwrap();
            let outcome = queue.nack(&m.id, true).await.unwrap();
            assert_eq!(outcome, NackOutcome::Requeued);
            let stats = queue.stats(QueueLane::Normal).await;
            assert_eq!(stats.failed, 0, "retry {} should not dead-letter", expected_retry);
        }

        // Failure 3: dead-lettered, not requeued a fourth time
        let m = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(m.metadata.retry_count, 2);
        let outcome = queue.nack(&m.id, true).await.unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered);

        assert!(queue.dequeue().await.unwrap().is_none());
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, message.id);
        assert_eq!(queue.stats(QueueLane::Normal).await.failed, 1);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters_immediately() {
        let queue = quick_queue();
        queue.enqueue(msg(WorkflowPriority::High, 5)).await.unwrap();
        let m = queue.dequeue().await.unwrap().unwrap();
        let outcome = queue.nack(&m.id, false).await.unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivery() {
        let queue = InMemoryQueue::new(Duration::from_millis(30), 8);
        let message = msg(WorkflowPriority::Medium, 0);
        queue.enqueue(message.clone()).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, message.id);
        // Unacked: invisible until the window lapses
        assert!(queue.dequeue().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let redelivered = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.id, message.id);
    }

    #[tokio::test]
    async fn test_acked_message_is_not_redelivered() {
        let queue = InMemoryQueue::new(Duration::from_millis(20), 8);
        queue.enqueue(msg(WorkflowPriority::Medium, 0)).await.unwrap();
        let m = queue.dequeue().await.unwrap().unwrap();
        queue.ack(&m.id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduled_message_held_until_due() {
        let queue = quick_queue();
        let mut message = msg(WorkflowPriority::Medium, 0);
        message.metadata.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(50));
        queue.enqueue(message.clone()).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(60)).await;
        let m = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(m.id, message.id);
    }

    #[tokio::test]
    async fn test_stats_track_processing() {
        let queue = quick_queue();
        queue.enqueue(msg(WorkflowPriority::Critical, 0)).await.unwrap();
        queue.enqueue(msg(WorkflowPriority::Critical, 0)).await.unwrap();

        let before = queue.stats(QueueLane::Critical).await;
        assert_eq!(before.size, 2);
        assert_eq!(before.processing, 0);

        let m = queue.dequeue().await.unwrap().unwrap();
        let during = queue.stats(QueueLane::Critical).await;
        assert_eq!(during.size, 1);
        assert_eq!(during.processing, 1);

        queue.ack(&m.id).await.unwrap();
        let after = queue.stats(QueueLane::Critical).await;
        assert_eq!(after.processing, 0);
    }
}
