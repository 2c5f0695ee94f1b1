//! # Device ids
//!
//! Devices are addressed by a canonical `g:<integer>` string. The prefix is matched
//! case-insensitively and everything after the first `:` must be a number.
use thiserror::Error;

const GLOBAL_DEVICE_ID_PREFIX: &str = "g";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{raw:?} is not a valid global device id")]
pub struct DeviceIdFormatError {
    pub raw: String,
}

impl DeviceIdFormatError {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_owned(),
        }
    }
}

/// Format a numeric device id as its canonical string.
pub fn encode(value: i64) -> String {
    format!("{GLOBAL_DEVICE_ID_PREFIX}:{value}")
}

/// Decode a canonical `g:<digits>` device id.
pub fn decode(raw: &str) -> Result<i64, DeviceIdFormatError> {
    let digits = split_global_id(raw)?;
    digits
        .parse::<i64>()
        .map_err(|_| DeviceIdFormatError::new(raw))
}

/// Decode a `g:<hex digits>` device id, as sent by some older clients.
pub fn decode_hex(raw: &str) -> Result<i64, DeviceIdFormatError> {
    let digits = split_global_id(raw)?;
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(DeviceIdFormatError::new(raw));
    }
    i64::from_str_radix(digits, 16).map_err(|_| DeviceIdFormatError::new(raw))
}

pub fn try_decode(raw: &str) -> Option<i64> {
    decode(raw).ok()
}

pub fn is_valid(raw: &str) -> bool {
    try_decode(raw).is_some()
}

fn split_global_id(raw: &str) -> Result<&str, DeviceIdFormatError> {
    let (prefix, remainder) = raw
        .split_once(':')
        .ok_or_else(|| DeviceIdFormatError::new(raw))?;

    if !prefix.eq_ignore_ascii_case(GLOBAL_DEVICE_ID_PREFIX) || remainder.is_empty() {
        return Err(DeviceIdFormatError::new(raw));
    }

    // `i64::from_str` accepts a leading sign, device ids never carry one.
    if remainder.starts_with(['+', '-']) {
        return Err(DeviceIdFormatError::new(raw));
    }

    Ok(remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_canonical_ids() {
        assert_eq!(decode("g:1234567890"), Ok(1234567890));
        assert_eq!(decode("G:42"), Ok(42));
        assert_eq!(decode(&encode(i64::MAX)), Ok(i64::MAX));
    }

    #[test]
    fn test_round_trip() {
        for value in [0, 1, 17, 6_755_399_441_055_744, i64::MAX] {
            assert_eq!(decode(&encode(value)), Ok(value));
        }
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for raw in [
            "",
            "g",
            "g:",
            ":123",
            "x:123",
            "gg:123",
            "g:12a",
            "g: 12",
            "g:+12",
            "g:-12",
            "g:1:2",
            "g:99999999999999999999",
            "t:0x1234",
            "1234",
        ] {
            let err = decode(raw).expect_err(raw);
            assert_eq!(err.raw, raw);
            assert_eq!(try_decode(raw), None);
            assert!(!is_valid(raw));
        }
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("g:ff"), Ok(255));
        assert_eq!(decode_hex("G:0x10"), Ok(16));
        assert!(decode_hex("g:0x").is_err());
        assert!(decode_hex("g:zz").is_err());
        assert!(decode_hex("x:ff").is_err());
    }

    #[test]
    fn test_split_on_first_colon_only() {
        // Anything after the first colon is the numeric segment, so extra colons are rejected.
        assert!(decode("g:12:34").is_err());
    }
}
