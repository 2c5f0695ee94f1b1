use metrics::counter;

pub const EVENTS_RECEIVED_TOTAL: &str = "delete_ingest_events_received_total";
pub const EVENTS_DROPPED_TOTAL: &str = "delete_ingest_events_dropped_total";
pub const ITEMS_PUBLISHED_TOTAL: &str = "delete_ingest_items_published_total";
pub const DEDUP_STORE_ERRORS_TOTAL: &str = "delete_dedup_store_errors_total";

pub fn report_dropped_events(cause: &'static str, quantity: u64) {
    counter!(EVENTS_DROPPED_TOTAL, "cause" => cause).increment(quantity);
}

pub fn report_dedup_store_error(operation: &'static str) {
    counter!(DEDUP_STORE_ERRORS_TOTAL, "operation" => operation).increment(1);
}
