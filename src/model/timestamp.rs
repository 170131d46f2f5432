use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{invalid_argument, DocSyncResult};

/// Wall-clock instant with nanosecond precision, normalized so that
/// `0 <= nanos < 1_000_000_000`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let mut timestamp = Self { seconds, nanos };
        timestamp.normalize();
        timestamp
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        Self {
            seconds: duration.as_secs() as i64,
            nanos: duration.subsec_nanos() as i32,
        }
    }

    /// Parses the RFC3339 string representation used on the wire.
    pub fn from_rfc3339(value: &str) -> DocSyncResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(value)
            .map_err(|err| invalid_argument(format!("Invalid timestamp {value:?}: {err}")))?;
        Ok(Self::new(
            parsed.timestamp(),
            parsed.timestamp_subsec_nanos() as i32,
        ))
    }

    /// Renders the RFC3339 string representation used on the wire.
    pub fn to_rfc3339(&self) -> String {
        let datetime = Utc
            .timestamp_opt(self.seconds, self.nanos.max(0) as u32)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
        datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    fn normalize(&mut self) {
        let extra_seconds = self.nanos.div_euclid(1_000_000_000);
        self.seconds += extra_seconds as i64;
        self.nanos = self.nanos.rem_euclid(1_000_000_000);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.seconds.cmp(&other.seconds) {
            Ordering::Equal => self.nanos.cmp(&other.nanos),
            ordering => ordering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_nanoseconds() {
        let timestamp = Timestamp::new(1, 1_500_000_000);
        assert_eq!(timestamp.seconds, 2);
        assert_eq!(timestamp.nanos, 500_000_000);
    }

    #[test]
    fn ordering() {
        let earlier = Timestamp::new(1, 0);
        let later = Timestamp::new(2, 0);
        assert!(earlier < later);
    }

    #[test]
    fn rfc3339_round_trip() {
        let timestamp = Timestamp::from_rfc3339("2023-04-01T12:30:45.5Z").unwrap();
        assert_eq!(timestamp.nanos, 500_000_000);
        let rendered = timestamp.to_rfc3339();
        assert_eq!(Timestamp::from_rfc3339(&rendered).unwrap(), timestamp);
    }

    #[test]
    fn rejects_garbage() {
        let err = Timestamp::from_rfc3339("yesterday").unwrap_err();
        assert_eq!(err.code_str(), "docsync/invalid-argument");
    }
}
