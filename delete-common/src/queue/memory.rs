//! # MemoryQueue
//!
//! An in-process backing queue with the same visibility and lease semantics as `PgQueue`.
//! Used when running locally without a database, and in tests, where it also records the
//! calls it sees and can be switched off to simulate an outage.
use std::collections::VecDeque;
use std::time;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{BackingQueue, QueueError, QueueMessage};

/// Only the most recent visibility delays are kept.
const RECORDED_DELAYS_LIMIT: usize = 1024;

#[derive(Debug)]
struct StoredMessage {
    id: i64,
    payload: Vec<u8>,
    created_at: Instant,
    visible_at: Instant,
    dequeue_count: i32,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    messages: Vec<StoredMessage>,
    unavailable: bool,
    enqueue_attempts: usize,
    dequeue_attempts: usize,
    size_reads: usize,
    delays: VecDeque<time::Duration>,
}

pub struct MemoryQueue {
    account: String,
    name: String,
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new(account: &str, name: &str) -> Self {
        Self {
            account: account.to_owned(),
            name: name.to_owned(),
            state: Mutex::new(State::default()),
        }
    }

    /// Make every subsequent operation fail with `QueueError::Unavailable` (or stop doing so).
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Number of enqueue calls seen, including failed ones.
    pub async fn enqueue_attempts(&self) -> usize {
        self.state.lock().await.enqueue_attempts
    }

    /// Number of dequeue calls seen, including failed ones.
    pub async fn dequeue_attempts(&self) -> usize {
        self.state.lock().await.dequeue_attempts
    }

    /// Number of size reads seen, including failed ones.
    pub async fn size_reads(&self) -> usize {
        self.state.lock().await.size_reads
    }

    /// Visibility delays of the most recent accepted enqueues, in call order.
    pub async fn recorded_delays(&self) -> Vec<time::Duration> {
        self.state.lock().await.delays.iter().copied().collect()
    }

    fn unavailable(&self) -> QueueError {
        QueueError::Unavailable {
            queue: self.name.clone(),
            reason: "queue was switched off".to_owned(),
        }
    }
}

#[async_trait]
impl BackingQueue for MemoryQueue {
    fn account(&self) -> &str {
        &self.account
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(
        &self,
        payload: Vec<u8>,
        visibility_delay: time::Duration,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.enqueue_attempts += 1;

        if state.unavailable {
            return Err(self.unavailable());
        }

        let now = Instant::now();
        state.next_id += 1;
        let id = state.next_id;

        if state.delays.len() == RECORDED_DELAYS_LIMIT {
            state.delays.pop_front();
        }
        state.delays.push_back(visibility_delay);
        state.messages.push(StoredMessage {
            id,
            payload,
            created_at: now,
            visible_at: now + visibility_delay,
            dequeue_count: 0,
        });

        Ok(())
    }

    async fn dequeue(
        &self,
        max_count: u32,
        lease: time::Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().await;
        state.dequeue_attempts += 1;

        if state.unavailable {
            return Err(self.unavailable());
        }

        let now = Instant::now();
        let mut visible: Vec<&mut StoredMessage> = state
            .messages
            .iter_mut()
            .filter(|message| message.visible_at <= now)
            .collect();
        visible.sort_by_key(|message| message.visible_at);

        Ok(visible
            .into_iter()
            .take(max_count as usize)
            .map(|message| {
                message.visible_at = now + lease;
                message.dequeue_count += 1;

                QueueMessage {
                    id: message.id,
                    payload: message.payload.clone(),
                    dequeue_count: message.dequeue_count,
                }
            })
            .collect())
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;

        if state.unavailable {
            return Err(self.unavailable());
        }

        state.messages.retain(|stored| {
            !(stored.id == message.id && stored.dequeue_count == message.dequeue_count)
        });

        Ok(())
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        state.size_reads += 1;

        if state.unavailable {
            return Err(self.unavailable());
        }

        Ok(state.messages.len() as u64)
    }

    async fn oldest_message_age(&self) -> Result<Option<time::Duration>, QueueError> {
        let state = self.state.lock().await;

        if state.unavailable {
            return Err(self.unavailable());
        }

        Ok(state
            .messages
            .iter()
            .map(|message| message.created_at)
            .min()
            .map(|created_at| created_at.elapsed()))
    }
}
