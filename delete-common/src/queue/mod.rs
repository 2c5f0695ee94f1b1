//! # Queues
//!
//! Work items are handed between services through a pool of interchangeable backing
//! queues. A backing queue only moves opaque payloads around; (de)serialization, queue
//! selection and failover live in [`pool::QueuePool`].
use std::time;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod pgqueue;
pub mod pool;
pub mod strategy;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid queue configuration: {0}")]
    Configuration(String),
    #[error("queue operation was cancelled")]
    Cancelled,
    #[error("{operation} on queue {queue} timed out")]
    Timeout { queue: String, operation: &'static str },
    #[error("{command} query on queue {queue} failed with: {error}")]
    Database {
        queue: String,
        command: &'static str,
        error: sqlx::Error,
    },
    #[error("could not (de)serialize queue payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("queue {queue} is unavailable: {reason}")]
    Unavailable { queue: String, reason: String },
}

/// A message leased from a backing queue. The message stays invisible to other consumers
/// until its lease runs out, unless it is deleted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: i64,
    pub payload: Vec<u8>,
    /// How many times this message has been leased, including this time. Together with
    /// `id` it identifies a single lease, so a stale receipt cannot delete a re-leased message.
    pub dequeue_count: i32,
}

#[async_trait]
pub trait BackingQueue: Send + Sync {
    /// Storage account (or cluster) the queue lives in. Used to label telemetry.
    fn account(&self) -> &str;

    fn name(&self) -> &str;

    /// Add a message that becomes visible to consumers once `visibility_delay` has elapsed.
    async fn enqueue(
        &self,
        payload: Vec<u8>,
        visibility_delay: time::Duration,
    ) -> Result<(), QueueError>;

    /// Lease up to `max_count` visible messages for `lease`.
    async fn dequeue(
        &self,
        max_count: u32,
        lease: time::Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a leased message for good.
    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Number of messages in the queue, visible or not.
    async fn size(&self) -> Result<u64, QueueError>;

    /// Age of the oldest message in the queue, `None` when the queue is empty.
    async fn oldest_message_age(&self) -> Result<Option<time::Duration>, QueueError>;

    /// `{account}.{name}`, as used in metric labels and logs.
    fn qualified_name(&self) -> String {
        format!("{}.{}", self.account(), self.name())
    }
}
