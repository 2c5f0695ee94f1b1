use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Who asked for a device delete. Each class is deduplicated over its own window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    System,
    User,
}

impl TrafficClass {
    /// An event is only system-initiated when the flag is present and explicitly 0.
    /// A missing flag falls back to the user window.
    pub fn from_initiated_by_user(flag: Option<i64>) -> Self {
        match flag {
            Some(0) => TrafficClass::System,
            _ => TrafficClass::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::System => "system",
            TrafficClass::User => "user",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct UtcExtension {
    #[serde(
        rename = "cV",
        alias = "cv",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_vector: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceExtension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc: Option<UtcExtension>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventData {
    #[serde(
        rename = "IsInitiatedByUser",
        alias = "isInitiatedByUser",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_initiated_by_user: Option<i64>,
    /// Anything else the sender put in the payload, carried along untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A device delete event as sent by the telemetry pipeline.
///
/// Senders have used several shapes over time, so the device id and correlation vector
/// each have a current location and a legacy fallback. Use the accessor methods rather
/// than reading the fields directly.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<EventExtensions>,
    #[serde(
        rename = "deviceId",
        alias = "DeviceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_device_id: Option<String>,
    #[serde(
        rename = "cV",
        alias = "correlationVector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_vector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl RawEvent {
    pub fn from_slice(bytes: &[u8]) -> Result<RawEvent, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// `ext.device.id`, falling back to the legacy top-level `deviceId`.
    pub fn device_id(&self) -> Option<&str> {
        self.ext
            .as_ref()
            .and_then(|ext| ext.device.as_ref())
            .and_then(|device| device.id.as_deref())
            .filter(|id| !id.is_empty())
            .or_else(|| self.legacy_device_id.as_deref().filter(|id| !id.is_empty()))
    }

    /// Top-level `cV`, falling back to `ext.utc.cV`.
    pub fn correlation_vector(&self) -> Option<&str> {
        self.correlation_vector
            .as_deref()
            .filter(|cv| !cv.is_empty())
            .or_else(|| {
                self.ext
                    .as_ref()
                    .and_then(|ext| ext.utc.as_ref())
                    .and_then(|utc| utc.correlation_vector.as_deref())
                    .filter(|cv| !cv.is_empty())
            })
    }

    pub fn initiated_by_user(&self) -> Option<i64> {
        self.data.as_ref().and_then(|data| data.is_initiated_by_user)
    }

    pub fn traffic_class(&self) -> TrafficClass {
        TrafficClass::from_initiated_by_user(self.initiated_by_user())
    }
}
