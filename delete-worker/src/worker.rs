//! # DeleteWorker
//!
//! Drains work items from the queue pool, fans each one out into delete requests and
//! forwards them downstream. Items are only removed from their queue once forwarded; anything
//! else reappears after its lease runs out.
use std::sync::Arc;
use std::time;

use delete_common::queue::pool::{QueueItem, QueuePool};
use delete_common::queue::QueueError;
use delete_common::work_item::DeviceDeleteWorkItem;
use futures::future::join_all;
use metrics::{counter, histogram};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DrainError, FanoutError};
use crate::fanout::SignalFanoutProcessor;
use crate::forwarder::CommandForwarder;

pub const WORKER_ITEMS_TOTAL: &str = "delete_worker_items_total";

/// What happened to one drained item.
#[derive(Debug)]
pub struct DrainOutcome {
    pub request_id: Uuid,
    /// Number of delete requests forwarded for the item.
    pub result: Result<usize, DrainError>,
}

impl DrainOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct DeleteWorker {
    name: String,
    pool: Arc<QueuePool<DeviceDeleteWorkItem>>,
    fanout: SignalFanoutProcessor,
    forwarder: Arc<dyn CommandForwarder>,
    poll_interval: time::Duration,
    batch_size: u32,
}

impl DeleteWorker {
    pub fn new(
        name: &str,
        pool: Arc<QueuePool<DeviceDeleteWorkItem>>,
        fanout: SignalFanoutProcessor,
        forwarder: Arc<dyn CommandForwarder>,
        poll_interval: time::Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            name: name.to_owned(),
            pool,
            fanout,
            forwarder,
            poll_interval,
            batch_size,
        }
    }

    /// Consume up to `max_count` items and process them concurrently. Every item gets its
    /// own outcome, one failing item does not affect the others.
    #[instrument(skip_all, fields(worker = %self.name))]
    pub async fn drain_and_forward(
        &self,
        max_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<DrainOutcome>, QueueError> {
        let items = self.pool.consume_batch(max_count, cancel).await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        histogram!("delete_worker_dequeue_batch_size").record(items.len() as f64);
        debug!(items = items.len(), "processing drained items");

        Ok(join_all(items.into_iter().map(|item| self.process_item(item))).await)
    }

    async fn process_item(&self, item: QueueItem<DeviceDeleteWorkItem>) -> DrainOutcome {
        let request_id = item.item.request_id;
        let result = self.fan_out_and_forward(&item).await;

        let outcome = match &result {
            Ok(forwarded) => {
                debug!(%request_id, forwarded, "forwarded delete requests");
                "forwarded"
            }
            Err(error) => {
                warn!(%request_id, dequeue_count = item.dequeue_count(), %error, "failed to process item");
                error.outcome()
            }
        };
        counter!(WORKER_ITEMS_TOTAL, "outcome" => outcome).increment(1);

        DrainOutcome { request_id, result }
    }

    async fn fan_out_and_forward(
        &self,
        item: &QueueItem<DeviceDeleteWorkItem>,
    ) -> Result<usize, DrainError> {
        let requests = match self.fanout.process(&item.item, item.item.request_id).await {
            Ok(requests) => requests,
            Err(error @ FanoutError::InvalidInput(_)) => {
                // It will never get better, so don't leave it in the queue.
                self.pool.complete(item).await?;
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        self.forwarder.forward(&requests).await?;
        self.pool.complete(item).await?;

        Ok(requests.len())
    }

    /// Drain on every poll interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(worker = %self.name, "starting delete worker");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.drain_and_forward(self.batch_size, &cancel).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                    if failed > 0 {
                        warn!(drained = outcomes.len(), failed, "some items were not forwarded");
                    }
                }
                Err(QueueError::Cancelled) => break,
                Err(error) => error!(%error, "failed to drain queues"),
            }
        }

        info!(worker = %self.name, "delete worker stopped");
    }
}
