// SPDX-License-Identifier: MIT

//! Durable multi-lane message queue contract
//!
//! Four priority lanes serviced in strict priority order with an explicit
//! anti-starvation escape, ack/nack-with-requeue, dead-lettering after the
//! retry budget is spent, and visibility-timeout redelivery for crashed
//! workers. The in-memory implementation is the default; the trait is the
//! seam for Redis- or SQS-backed queues.

mod memory;
mod message;

pub use memory::InMemoryQueue;
pub use message::{MessageMetadata, MessageType, QueueMessage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::types::QueueLane;

/// Result of a negative acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// The message went back onto its lane for redelivery
    Requeued,
    /// The retry budget was exhausted (or requeue was declined); the
    /// message moved to the dead-letter sink
    DeadLettered,
}

/// Point-in-time counters for one lane
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Messages waiting for delivery (including not-yet-due scheduled ones)
    pub size: usize,
    /// Delivered but not yet acked/nacked
    pub processing: usize,
    /// Dead-lettered since the queue started
    pub failed: usize,
}

/// Queue backend contract
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), EngineError>;

    /// Next deliverable message across all lanes, highest priority first.
    /// Returns `None` when nothing is due.
    async fn dequeue(&self) -> Result<Option<QueueMessage>, EngineError>;

    /// Positive acknowledgement: the message is done and forgotten
    async fn ack(&self, message_id: &str) -> Result<(), EngineError>;

    /// Negative acknowledgement. With `requeue` the retry counter is
    /// incremented first; exceeding `max_retries` dead-letters instead.
    async fn nack(&self, message_id: &str, requeue: bool) -> Result<NackOutcome, EngineError>;

    async fn stats(&self, lane: QueueLane) -> QueueStats;

    /// Messages that exhausted their retry budget, for external remediation
    async fn dead_letters(&self) -> Vec<QueueMessage>;
}
