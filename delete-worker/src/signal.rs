//! # Signals and delete requests
//!
//! A work item is fanned out into one signal per governed data category. Once every signal
//! holds a verifier token, each one becomes a [`DeleteRequest`] for the downstream command
//! system.
use delete_common::work_item::RequestInformation;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Data categories a device delete applies to when none are configured.
pub const DEFAULT_DATA_CATEGORIES: &[&str] = &[
    "BrowsingHistory",
    "CustomerContent",
    "ProductAndServicePerformance",
    "ProductAndServiceUsage",
    "SoftwareSetupAndInventory",
    "DeviceConnectivityAndConfiguration",
    "InkingTypingAndSpeechUtterance",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub data_type: String,
    pub command_id: Uuid,
    pub request_guid: Uuid,
    pub verifier: Option<String>,
}

impl Signal {
    pub fn new(data_type: &str, request_guid: Uuid) -> Self {
        Self {
            data_type: data_type.to_owned(),
            command_id: Uuid::new_v4(),
            request_guid,
            verifier: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSubject {
    pub global_device_id: i64,
}

/// Everything logged up to `end_time` is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangePredicate {
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub subject: DeviceSubject,
    pub data_type: String,
    pub time_range_predicate: TimeRangePredicate,
    pub verifier: String,
    pub command_id: Uuid,
    pub request_guid: Uuid,
    pub correlation_vector: String,
    #[serde(with = "time::serde::rfc3339")]
    pub request_time: OffsetDateTime,
    pub is_watchdog_request: bool,
}

impl DeleteRequest {
    pub fn new(
        device_id: i64,
        signal: Signal,
        verifier: String,
        event_time: Option<OffsetDateTime>,
        correlation_vector: String,
        request_information: &RequestInformation,
    ) -> Self {
        Self {
            subject: DeviceSubject {
                global_device_id: device_id,
            },
            data_type: signal.data_type,
            time_range_predicate: TimeRangePredicate {
                start_time: OffsetDateTime::UNIX_EPOCH,
                end_time: event_time.unwrap_or(request_information.request_time),
            },
            verifier,
            command_id: signal.command_id,
            request_guid: signal.request_guid,
            correlation_vector,
            request_time: request_information.request_time,
            is_watchdog_request: request_information.is_watchdog_request,
        }
    }
}
