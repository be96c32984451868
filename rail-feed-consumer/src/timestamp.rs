use chrono::{DateTime, Local, Utc};
use serde::Serialize;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A feed timestamp reduced to whole seconds, plus its UTC rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedTimestamp {
    pub epoch_seconds: i64,
    pub iso: Option<String>,
}

impl FeedTimestamp {
    pub const ABSENT: FeedTimestamp = FeedTimestamp {
        epoch_seconds: 0,
        iso: None,
    };
}

/// Convert a feed millisecond timestamp. Absent and zero both mean "no time".
pub fn normalize(raw_ms: Option<i64>) -> FeedTimestamp {
    let ms = match raw_ms {
        None | Some(0) => return FeedTimestamp::ABSENT,
        Some(ms) => ms,
    };

    let epoch_seconds = ms / 1000;
    let iso = DateTime::<Utc>::from_timestamp(epoch_seconds, 0)
        .map(|at| at.format(ISO_FORMAT).to_string());

    FeedTimestamp { epoch_seconds, iso }
}

/// Render an instant in the process' local zone, without fraction or offset.
/// Used for observation times and window labels.
pub fn local_iso(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(ISO_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_and_zero_are_empty() {
        assert_eq!(normalize(None), FeedTimestamp::ABSENT);
        assert_eq!(normalize(Some(0)), FeedTimestamp::ABSENT);
    }

    #[test]
    fn test_millis_truncate_to_seconds() {
        let ts = normalize(Some(1_455_883_470_999));
        assert_eq!(ts.epoch_seconds, 1_455_883_470);
        assert_eq!(ts.iso.as_deref(), Some("2016-02-19T12:04:30"));
    }

    #[test]
    fn test_rendering_has_no_fraction_or_zone() {
        let ts = normalize(Some(1_000));
        assert_eq!(ts.epoch_seconds, 1);
        assert_eq!(ts.iso.as_deref(), Some("1970-01-01T00:00:01"));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        assert_eq!(normalize(Some(1_700_000_000_123)), normalize(Some(1_700_000_000_456)));
    }

    #[test]
    fn test_local_iso_shape() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        let rendered = local_iso(at);
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[10..11], "T");
        assert!(!rendered.contains('.'));
    }
}
