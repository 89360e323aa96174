//! Millisecond timestamps with ISO-8601 wire representation.
//!
//! Records carry human-auditable creation/update times, so the serde form
//! is an RFC 3339 string rather than a raw integer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Current system time.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from this timestamp to `now`.
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether this timestamp is older than `window_ms` relative to `now`.
    pub fn is_older_than(&self, window_ms: u64, now: Timestamp) -> bool {
        self.elapsed_since(now) > window_ms
    }

    /// RFC 3339 rendering with millisecond precision, e.g.
    /// `2025-11-03T17:04:05.123Z`.
    pub fn to_iso8601(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0 as i64)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).expect("epoch"))
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parse an RFC 3339 string back into a timestamp.
    pub fn from_iso8601(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.timestamp_millis().max(0) as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::from_iso8601(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid RFC 3339 timestamp: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_round_trip() {
        let ts = Timestamp::from_millis(1_730_000_000_123);
        let rendered = ts.to_iso8601();
        assert!(rendered.ends_with('Z'));
        assert_eq!(Timestamp::from_iso8601(&rendered), Some(ts));
    }

    #[test]
    fn serde_uses_string_form() {
        let ts = Timestamp::from_millis(0);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1970-01-01T00:00:00.000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn age_window_check() {
        let old = Timestamp::from_millis(1_000);
        let now = Timestamp::from_millis(10_000);
        assert!(old.is_older_than(5_000, now));
        assert!(!old.is_older_than(9_000, now));
    }
}
