//! # Deduplication
//!
//! Senders tend to repeat device delete events. An event is let through at most once per
//! window and device, with separate windows for system and user initiated traffic.
//!
//! Every allowed event refreshes the device's record in the dedup store, with a TTL equal
//! to the window of its class. Store failures let the event through: a repeated delete is
//! harmless downstream, a lost one is not.
use std::sync::Arc;
use std::time::Duration;

use delete_common::device_id;
use delete_common::event::{RawEvent, TrafficClass};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::prometheus::{report_dedup_store_error, report_dropped_events};

pub mod redis;
pub mod store;

use store::DedupStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Allowed,
    Duplicate,
    InvalidDeviceId,
}

#[derive(Clone)]
pub struct DedupFilter {
    store: Arc<dyn DedupStore>,
    system_window: Duration,
    user_window: Duration,
}

impl DedupFilter {
    pub fn new(
        store: Arc<dyn DedupStore>,
        system_window: Duration,
        user_window: Duration,
    ) -> Self {
        Self {
            store,
            system_window,
            user_window,
        }
    }

    pub fn window(&self, class: TrafficClass) -> Duration {
        match class {
            TrafficClass::System => self.system_window,
            TrafficClass::User => self.user_window,
        }
    }

    /// Store namespace holding the records of a traffic class.
    pub fn namespace(class: TrafficClass) -> &'static str {
        class.as_str()
    }

    /// Resolve the device id and traffic class of `event`, then run it through the filter.
    /// Events without a valid device id never reach the store.
    pub async fn check_event(&self, event: &RawEvent, now: OffsetDateTime) -> DedupVerdict {
        let Some(device) = event.device_id().filter(|id| device_id::is_valid(id)) else {
            debug!(device_id = ?event.device_id(), "dropping event with invalid device id");
            report_dropped_events("invalid_device_id", 1);
            return DedupVerdict::InvalidDeviceId;
        };

        if self.is_allowed(device, event.traffic_class(), now).await {
            DedupVerdict::Allowed
        } else {
            DedupVerdict::Duplicate
        }
    }

    /// Whether an event for `device_id` should go through at `now`. Allowing an event
    /// records `now` as the device's last seen time.
    pub async fn is_allowed(
        &self,
        device_id: &str,
        class: TrafficClass,
        now: OffsetDateTime,
    ) -> bool {
        let namespace = Self::namespace(class);
        let window = self.window(class);
        let now = now.unix_timestamp();

        let last_seen = match self.store.get_timestamp(namespace, device_id).await {
            Ok(last_seen) => last_seen,
            Err(error) => {
                warn!(namespace, device_id, %error, "dedup lookup failed, allowing event");
                report_dedup_store_error("get");
                return true;
            }
        };

        if let Some(last_seen) = last_seen {
            if now.saturating_sub(last_seen) <= window.as_secs() as i64 {
                debug!(namespace, device_id, last_seen, "dropping duplicate event");
                report_dropped_events("duplicate", 1);
                return false;
            }
        }

        if let Err(error) = self
            .store
            .set_timestamp(namespace, device_id, now, window)
            .await
        {
            warn!(namespace, device_id, %error, "failed to record dedup timestamp");
            report_dedup_store_error("set");
        }

        true
    }
}
