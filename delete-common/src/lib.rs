pub mod config;
pub mod device_id;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod work_item;
