//! # Work items
//!
//! The unit handed from ingestion to the drain workers through the queue pool.
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::event::RawEvent;

/// What the ingestion endpoint observed about the request that carried an event.
/// Only `request_time` is required on the wire, everything else is omitted when default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInformation {
    #[serde(default, skip_serializing_if = "is_false")]
    pub had_server_name: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub had_user_agent: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_watchdog_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub was_compressed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub request_time: OffsetDateTime,
}

impl RequestInformation {
    pub fn new(request_time: OffsetDateTime) -> Self {
        Self {
            had_server_name: false,
            had_user_agent: false,
            is_watchdog_request: false,
            served_by: None,
            user_agent: None,
            was_compressed: false,
            request_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDeleteWorkItem {
    /// The original event exactly as received.
    #[serde(with = "event_bytes")]
    pub vortex_event_data: Vec<u8>,
    pub request_information: RequestInformation,
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(rename = "isSentToPCF", default)]
    pub is_sent_to_pcf: bool,
}

impl DeviceDeleteWorkItem {
    pub fn new(event_data: Vec<u8>, request_information: RequestInformation) -> Self {
        Self {
            vortex_event_data: event_data,
            request_information,
            request_id: Uuid::new_v4(),
            is_sent_to_pcf: false,
        }
    }

    pub fn event(&self) -> Result<RawEvent, serde_json::Error> {
        RawEvent::from_slice(&self.vortex_event_data)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Event bytes are written as base64. Older producers wrote a plain JSON byte array,
/// which we still accept on read.
mod event_bytes {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EncodedBytes {
        Base64(String),
        Array(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match EncodedBytes::deserialize(deserializer)? {
            EncodedBytes::Base64(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom),
            EncodedBytes::Array(bytes) => Ok(bytes),
        }
    }
}
