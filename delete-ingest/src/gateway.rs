//! # Ingestion
//!
//! Turns an inbound batch of device delete events into queued work items.
use std::sync::Arc;
use std::time::Duration;

use delete_common::event::RawEvent;
use delete_common::queue::pool::QueuePool;
use delete_common::work_item::{DeviceDeleteWorkItem, RequestInformation};
use metrics::counter;
use rand::Rng;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use crate::api::{IngestError, IngestSummary};
use crate::dedup::{DedupFilter, DedupVerdict};
use crate::prometheus::{EVENTS_RECEIVED_TOTAL, ITEMS_PUBLISHED_TOTAL};
use crate::time::TimeSource;

#[derive(Deserialize)]
struct EventBatch<'a> {
    #[serde(rename = "Events", borrow)]
    events: Vec<&'a RawValue>,
}

pub struct IngestionGateway {
    dedup: DedupFilter,
    pool: Arc<QueuePool<DeviceDeleteWorkItem>>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    max_visibility_minutes: u32,
    cancel: CancellationToken,
}

impl IngestionGateway {
    pub fn new(
        dedup: DedupFilter,
        pool: Arc<QueuePool<DeviceDeleteWorkItem>>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        max_visibility_minutes: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dedup,
            pool,
            timesource,
            max_visibility_minutes,
            cancel,
        }
    }

    pub fn timesource(&self) -> &(dyn TimeSource + Send + Sync) {
        self.timesource.as_ref()
    }

    /// Parse, dedup and queue a batch of events.
    ///
    /// The whole batch is rejected if any event is malformed. Surviving events share a single
    /// visibility delay, drawn at random in whole minutes, so downstream load from a burst is
    /// spread out. A publish failure fails the call, but items already published stay queued.
    #[instrument(skip_all, fields(batch_size, published))]
    pub async fn ingest(
        &self,
        batch: &[u8],
        request_information: RequestInformation,
    ) -> Result<IngestSummary, IngestError> {
        let events = parse_batch(batch)?;
        tracing::Span::current().record("batch_size", events.len());
        counter!(EVENTS_RECEIVED_TOTAL).increment(events.len() as u64);

        let mut summary = IngestSummary {
            received: events.len(),
            ..Default::default()
        };
        let now = self.timesource.current_time();

        let mut items = Vec::with_capacity(events.len());
        for (bytes, event) in events {
            match self.dedup.check_event(&event, now).await {
                DedupVerdict::Allowed => items.push(DeviceDeleteWorkItem::new(
                    bytes,
                    request_information.clone(),
                )),
                DedupVerdict::Duplicate => summary.duplicates += 1,
                DedupVerdict::InvalidDeviceId => summary.invalid_device_id += 1,
            }
        }

        if items.is_empty() {
            debug!(?summary, "nothing left to publish");
            return Ok(summary);
        }

        let delay = self.visibility_delay();
        let published = self
            .pool
            .publish_batch(&items, delay, &self.cancel)
            .await
            .map_err(|error| {
                error!(%error, items = items.len(), "failed to publish work items");
                IngestError::from(error)
            })?;

        counter!(ITEMS_PUBLISHED_TOTAL).increment(published as u64);
        tracing::Span::current().record("published", published);
        summary.published = published;

        debug!(?summary, delay_minutes = delay.as_secs() / 60, "ingested batch");
        Ok(summary)
    }

    fn visibility_delay(&self) -> Duration {
        if self.max_visibility_minutes == 0 {
            return Duration::ZERO;
        }

        let minutes = rand::thread_rng().gen_range(0..self.max_visibility_minutes);
        Duration::from_secs(u64::from(minutes) * 60)
    }
}

/// Split a `{"Events": [...]}` payload into events, keeping the original bytes of each one.
pub fn parse_batch(batch: &[u8]) -> Result<Vec<(Vec<u8>, RawEvent)>, IngestError> {
    let batch: EventBatch = serde_json::from_slice(batch)
        .map_err(|error| IngestError::InvalidInput(format!("invalid event batch: {error}")))?;

    batch
        .events
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let bytes = raw.get().as_bytes().to_vec();
            RawEvent::from_slice(&bytes)
                .map(|event| (bytes, event))
                .map_err(|error| {
                    IngestError::InvalidInput(format!("invalid event at index {index}: {error}"))
                })
        })
        .collect()
}
