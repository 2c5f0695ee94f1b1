//! # QueuePool
//!
//! A fixed set of interchangeable backing queues. Every publish lands on exactly one queue,
//! picked by a [`SelectionStrategy`](super::strategy::SelectionStrategy); when that queue fails the next candidate is tried until
//! the pool is exhausted. Consumers drain whichever queue has work first.
//!
//! The pool also supervises one monitor task per queue, reporting depth and oldest message age.
use std::marker::PhantomData;
use std::sync::Arc;
use std::time;

use futures::future::join_all;
use metrics::{counter, gauge};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::strategy::StrategyFactory;
use super::{BackingQueue, QueueError, QueueMessage};
use crate::metrics::{
    QUEUE_LENGTH_GAUGE, QUEUE_OLDEST_MESSAGE_AGE_GAUGE, QUEUE_POISON_MESSAGES,
    QUEUE_PUBLISH_FAILURES,
};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long a consumed message stays invisible to other consumers.
    pub lease: time::Duration,
    /// Upper bound for a single dequeue call against one queue.
    pub dequeue_timeout: time::Duration,
    /// Retries for dequeue calls against a single queue.
    pub retry_policy: RetryPolicy,
    pub monitor_interval: time::Duration,
    /// Maximum number of publishes in flight during `publish_batch`.
    pub publish_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lease: time::Duration::from_secs(5 * 60),
            dequeue_timeout: time::Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            monitor_interval: time::Duration::from_secs(30),
            publish_concurrency: 10,
        }
    }
}

/// A consumed item together with what is needed to delete it from its queue.
#[derive(Debug)]
pub struct QueueItem<T> {
    pub item: T,
    queue_index: usize,
    message_id: i64,
    dequeue_count: i32,
}

impl<T> QueueItem<T> {
    /// Index of the originating queue in the pool.
    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    /// How many times the underlying message has been leased, this time included.
    pub fn dequeue_count(&self) -> i32 {
        self.dequeue_count
    }

    pub fn into_inner(self) -> T {
        self.item
    }

    fn receipt(&self) -> QueueMessage {
        QueueMessage {
            id: self.message_id,
            payload: Vec::new(),
            dequeue_count: self.dequeue_count,
        }
    }
}

pub struct QueuePool<T> {
    queues: Vec<Arc<dyn BackingQueue>>,
    strategy: Box<dyn StrategyFactory>,
    config: PoolConfig,
    cancel: CancellationToken,
    monitors: Mutex<Vec<JoinHandle<()>>>,
    _item: PhantomData<fn() -> T>,
}

impl<T> QueuePool<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Build a pool over `queues` and start monitoring them. Monitors stop when `cancel`
    /// fires, when `shutdown` is called or when the pool is dropped.
    pub fn new(
        queues: Vec<Arc<dyn BackingQueue>>,
        strategy: impl StrategyFactory + 'static,
        config: PoolConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, QueueError> {
        if queues.is_empty() {
            return Err(QueueError::Configuration(
                "a queue pool needs at least one backing queue".to_owned(),
            ));
        }

        let cancel = cancel.child_token();
        let monitors = queues
            .iter()
            .map(|queue| spawn_monitor(queue.clone(), config.monitor_interval, cancel.clone()))
            .collect();

        info!(queues = queues.len(), "started queue pool");

        Ok(Self {
            queues,
            strategy: Box::new(strategy),
            config,
            cancel,
            monitors: Mutex::new(monitors),
            _item: PhantomData,
        })
    }

    pub fn queues(&self) -> &[Arc<dyn BackingQueue>] {
        &self.queues
    }

    /// Publish `item` to exactly one queue, failing over to the remaining queues on error.
    /// Returns the last error seen when every queue failed.
    pub async fn publish_one(
        &self,
        item: &T,
        visibility_delay: time::Duration,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(item)?;
        let mut strategy = self.strategy.create(&self.queues);
        let mut last_error = None;

        while let Some((index, queue)) = strategy.try_take_next() {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            match queue.enqueue(payload.clone(), visibility_delay).await {
                Ok(()) => {
                    debug!(queue = %queue.qualified_name(), index, "published item");
                    return Ok(());
                }
                Err(error) => {
                    let name = queue.qualified_name();
                    warn!(queue = %name, index, %error, "publish failed, trying next queue");
                    counter!(QUEUE_PUBLISH_FAILURES, "queue" => name).increment(1);
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::Configuration("selection strategy returned no queue".to_owned())
        }))
    }

    /// Publish every item with the same visibility delay, at most `publish_concurrency` at a
    /// time. Each group completes before the next starts; the first failing group ends the
    /// call, items published before it stay published.
    pub async fn publish_batch(
        &self,
        items: &[T],
        visibility_delay: time::Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, QueueError> {
        let mut published = 0;

        for chunk in items.chunks(self.config.publish_concurrency.max(1)) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|item| self.publish_one(item, visibility_delay, cancel)),
            )
            .await;

            let succeeded = results.iter().filter(|result| result.is_ok()).count();
            published += succeeded;

            if let Some(error) = results.into_iter().find_map(Result::err) {
                error!(
                    published,
                    failed = chunk.len() - succeeded,
                    total = items.len(),
                    %error,
                    "batch publish failed"
                );
                return Err(error);
            }
        }

        Ok(published)
    }

    /// Lease up to `max_count` items from the first queue that has any. Returns an empty
    /// `Vec` when nothing is available on any queue.
    pub async fn consume_batch(
        &self,
        max_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueueItem<T>>, QueueError> {
        let mut strategy = self.strategy.create(&self.queues);

        while let Some((index, queue)) = strategy.try_take_next() {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let messages = match self.dequeue_with_retry(queue.as_ref(), max_count, cancel).await
            {
                Ok(messages) => messages,
                Err(QueueError::Cancelled) => return Err(QueueError::Cancelled),
                Err(error) => {
                    error!(queue = %queue.qualified_name(), %error, "giving up on queue for this batch");
                    continue;
                }
            };

            let items = self.deserialize(index, queue.as_ref(), messages).await;
            if !items.is_empty() {
                return Ok(items);
            }
        }

        Ok(Vec::new())
    }

    /// Delete a processed item from the queue it came from.
    pub async fn complete(&self, item: &QueueItem<T>) -> Result<(), QueueError> {
        let queue = self.queues.get(item.queue_index).ok_or_else(|| {
            QueueError::Configuration(format!("no queue at index {}", item.queue_index))
        })?;

        queue.delete(&item.receipt()).await
    }

    /// Stop monitoring and wait for every monitor task to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let monitors = std::mem::take(&mut *self.monitors.lock().await);
        for result in join_all(monitors).await {
            if let Err(error) = result {
                error!(%error, "queue monitor task failed");
            }
        }
    }

    async fn dequeue_with_retry(
        &self,
        queue: &dyn BackingQueue,
        max_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let policy = &self.config.retry_policy;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.config.dequeue_timeout,
                queue.dequeue(max_count, self.config.lease),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(QueueError::Timeout {
                    queue: queue.qualified_name(),
                    operation: "dequeue",
                }),
            };

            match result {
                Ok(messages) => return Ok(messages),
                Err(error) if policy.should_retry(attempt) => {
                    let interval = policy.retry_interval(attempt);
                    warn!(
                        queue = %queue.qualified_name(),
                        attempt,
                        retry_in = ?interval,
                        %error,
                        "dequeue failed"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn deserialize(
        &self,
        index: usize,
        queue: &dyn BackingQueue,
        messages: Vec<QueueMessage>,
    ) -> Vec<QueueItem<T>> {
        let mut items = Vec::with_capacity(messages.len());

        for message in messages {
            match serde_json::from_slice::<T>(&message.payload) {
                Ok(item) => items.push(QueueItem {
                    item,
                    queue_index: index,
                    message_id: message.id,
                    dequeue_count: message.dequeue_count,
                }),
                Err(error) => {
                    let name = queue.qualified_name();
                    error!(queue = %name, message_id = message.id, %error, "dropping message that cannot be deserialized");
                    counter!(QUEUE_POISON_MESSAGES, "queue" => name.clone()).increment(1);

                    if let Err(error) = queue.delete(&message).await {
                        warn!(queue = %name, message_id = message.id, %error, "failed to delete poison message");
                    }
                }
            }
        }

        items
    }
}

impl<T> Drop for QueuePool<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_monitor(
    queue: Arc<dyn BackingQueue>,
    interval: time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(time::Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = report_queue_depth(queue.as_ref()) => {}
            }
        }

        debug!(queue = %queue.qualified_name(), "queue monitor stopped");
    })
}

async fn report_queue_depth(queue: &dyn BackingQueue) {
    let name = queue.qualified_name();

    let size = match queue.size().await {
        Ok(size) => size,
        Err(error) => {
            warn!(queue = %name, %error, "failed to read queue size");
            return;
        }
    };

    let oldest_message_age = if size > 0 {
        match queue.oldest_message_age().await {
            Ok(age) => age,
            Err(error) => {
                warn!(queue = %name, %error, "failed to read oldest message age");
                None
            }
        }
    } else {
        None
    };
    let age_seconds = oldest_message_age.map_or(0.0, |age| age.as_secs_f64());

    gauge!(QUEUE_LENGTH_GAUGE, "queue" => name.clone()).set(size as f64);
    gauge!(QUEUE_OLDEST_MESSAGE_AGE_GAUGE, "queue" => name.clone()).set(age_seconds);

    info!(
        queue = %name,
        size,
        oldest_message_age_seconds = age_seconds,
        "queue depth"
    );
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::queue::memory::MemoryQueue;
    use crate::queue::strategy::{Ordered, RoundRobin};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct TestItem {
        id: u32,
    }

    fn memory_queues(count: usize) -> Vec<Arc<MemoryQueue>> {
        (0..count)
            .map(|i| Arc::new(MemoryQueue::new("test", &format!("q{i}"))))
            .collect()
    }

    fn as_backing(queues: &[Arc<MemoryQueue>]) -> Vec<Arc<dyn BackingQueue>> {
        queues
            .iter()
            .map(|queue| {
                let queue: Arc<dyn BackingQueue> = queue.clone();
                queue
            })
            .collect()
    }

    fn pool(
        queues: &[Arc<MemoryQueue>],
        strategy: impl StrategyFactory + 'static,
    ) -> QueuePool<TestItem> {
        QueuePool::new(
            as_backing(queues),
            strategy,
            PoolConfig::default(),
            &CancellationToken::new(),
        )
        .expect("failed to build pool")
    }

    #[tokio::test]
    async fn test_empty_pool_is_rejected() {
        let result = QueuePool::<TestItem>::new(
            Vec::new(),
            RoundRobin::new(),
            PoolConfig::default(),
            &CancellationToken::new(),
        );

        assert!(matches!(result, Err(QueueError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_publish_fails_over_to_next_queue() {
        let queues = memory_queues(3);
        queues[0].set_unavailable(true).await;
        queues[1].set_unavailable(true).await;
        let pool = pool(&queues, Ordered);

        pool.publish_one(&TestItem { id: 1 }, time::Duration::ZERO, &CancellationToken::new())
            .await
            .expect("publish should fail over");

        let mut attempts = 0;
        for queue in &queues {
            assert_eq!(queue.enqueue_attempts().await, 1);
            attempts += queue.enqueue_attempts().await;
        }
        assert_eq!(attempts, 3);
        assert_eq!(queues[2].size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_publish_returns_last_error_when_all_fail() {
        let queues = memory_queues(2);
        for queue in &queues {
            queue.set_unavailable(true).await;
        }
        let pool = pool(&queues, Ordered);

        let error = pool
            .publish_one(&TestItem { id: 1 }, time::Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap_err();

        match error {
            QueueError::Unavailable { queue, .. } => assert_eq!(queue, "q1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_publish_surfaces_cancellation() {
        let queues = memory_queues(2);
        let pool = pool(&queues, RoundRobin::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pool
            .publish_one(&TestItem { id: 1 }, time::Duration::ZERO, &cancel)
            .await;

        assert!(matches!(result, Err(QueueError::Cancelled)));
        for queue in &queues {
            assert_eq!(queue.enqueue_attempts().await, 0);
        }
    }

    #[tokio::test]
    async fn test_publish_batch_spreads_items_with_one_delay() {
        let queues = memory_queues(3);
        let pool = pool(&queues, RoundRobin::new());
        let items: Vec<TestItem> = (0..25).map(|id| TestItem { id }).collect();
        let delay = time::Duration::from_secs(17 * 60);

        let published = pool
            .publish_batch(&items, delay, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(published, 25);

        let mut total = 0;
        for queue in &queues {
            let delays = queue.recorded_delays().await;
            assert!(!delays.is_empty());
            assert!(delays.iter().all(|recorded| *recorded == delay));
            total += delays.len();
        }
        assert_eq!(total, 25);
    }

    #[tokio::test]
    async fn test_publish_batch_stops_after_failing_group() {
        let queues = memory_queues(1);
        queues[0].set_unavailable(true).await;
        let pool = pool(&queues, RoundRobin::new());
        let items: Vec<TestItem> = (0..25).map(|id| TestItem { id }).collect();

        let result = pool
            .publish_batch(&items, time::Duration::ZERO, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(queues[0].enqueue_attempts().await, 10);
    }

    #[tokio::test]
    async fn test_consume_finds_work_on_any_queue() {
        let queues = memory_queues(3);
        let pool = pool(&queues, Ordered);

        for id in 0..3 {
            let payload = serde_json::to_vec(&TestItem { id }).unwrap();
            queues[1].enqueue(payload, time::Duration::ZERO).await.unwrap();
        }

        let items = pool
            .consume_batch(2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.queue_index() == 1));
        assert_eq!(queues[0].dequeue_attempts().await, 1);
        assert_eq!(queues[2].dequeue_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_consume_returns_empty_when_nothing_available() {
        let queues = memory_queues(3);
        let pool = pool(&queues, RoundRobin::new());

        let items = pool
            .consume_batch(10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(items.is_empty());
        for queue in &queues {
            assert_eq!(queue.dequeue_attempts().await, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_retries_a_failing_queue_then_moves_on() {
        let queues = memory_queues(2);
        queues[0].set_unavailable(true).await;
        let payload = serde_json::to_vec(&TestItem { id: 7 }).unwrap();
        queues[1].enqueue(payload, time::Duration::ZERO).await.unwrap();
        let pool = pool(&queues, Ordered);

        let items = pool
            .consume_batch(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(queues[0].dequeue_attempts().await, 3);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item, TestItem { id: 7 });
    }

    #[tokio::test]
    async fn test_consume_surfaces_cancellation() {
        let queues = memory_queues(1);
        let pool = pool(&queues, RoundRobin::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pool.consume_batch(10, &cancel).await;

        assert!(matches!(result, Err(QueueError::Cancelled)));
        assert_eq!(queues[0].dequeue_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_poison_messages_are_deleted() {
        let queues = memory_queues(1);
        let pool = pool(&queues, RoundRobin::new());

        queues[0]
            .enqueue(b"not json".to_vec(), time::Duration::ZERO)
            .await
            .unwrap();
        let payload = serde_json::to_vec(&TestItem { id: 3 }).unwrap();
        queues[0].enqueue(payload, time::Duration::ZERO).await.unwrap();

        let items = pool
            .consume_batch(10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item, TestItem { id: 3 });
        assert_eq!(queues[0].size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_complete_deletes_from_origin() {
        let queues = memory_queues(2);
        let pool = pool(&queues, Ordered);
        pool.publish_one(&TestItem { id: 1 }, time::Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();

        let items = pool
            .consume_batch(10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].dequeue_count(), 1);

        pool.complete(&items[0]).await.unwrap();

        assert_eq!(queues[0].size().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_survive_failures_and_shut_down() {
        use crate::metrics::test_recorder;
        use metrics_util::debugging::DebugValue;

        test_recorder::install();
        let queue_length =
            |queue: &str| match test_recorder::value(QUEUE_LENGTH_GAUGE, "queue", queue) {
                Some(DebugValue::Gauge(value)) => Some(value.into_inner()),
                _ => None,
            };

        let failing = Arc::new(MemoryQueue::new("monitored", "failing"));
        let healthy = Arc::new(MemoryQueue::new("monitored", "healthy"));
        failing.set_unavailable(true).await;
        for id in 0..2 {
            let payload = serde_json::to_vec(&TestItem { id }).unwrap();
            healthy.enqueue(payload, time::Duration::ZERO).await.unwrap();
        }
        let queues = vec![failing.clone(), healthy.clone()];
        let pool = pool(&queues, RoundRobin::new());

        // Ticks at 0s, 30s, 60s and 90s.
        tokio::time::sleep(time::Duration::from_secs(95)).await;

        assert_eq!(failing.size_reads().await, 4);
        assert_eq!(healthy.size_reads().await, 4);
        assert_eq!(queue_length("monitored.healthy"), Some(2.0));
        assert_eq!(queue_length("monitored.failing"), None);

        pool.shutdown().await;
        assert!(pool.monitors.lock().await.is_empty());

        tokio::time::sleep(time::Duration::from_secs(120)).await;
        assert_eq!(healthy.size_reads().await, 4);
    }
}
