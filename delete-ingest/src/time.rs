use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use time::OffsetDateTime;

pub trait TimeSource {
    fn current_time(&self) -> OffsetDateTime;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn current_time(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to, with second precision. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualTime {
    unix_seconds: Arc<AtomicI64>,
}

impl ManualTime {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            unix_seconds: Arc::new(AtomicI64::new(start.unix_timestamp())),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        self.unix_seconds
            .fetch_add(by.whole_seconds(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn current_time(&self) -> OffsetDateTime {
        let seconds = self.unix_seconds.load(Ordering::SeqCst);
        OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}
