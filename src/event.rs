use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded barcode, as it travels over the wire: a single-line JSON
/// object per datagram / log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub node: String,
    pub seq: u64,
    pub barcode: String,
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
}

impl ScanEvent {
    pub fn new(node: String, seq: u64, barcode: String) -> Self {
        Self {
            node,
            seq,
            barcode,
            timestamp: Utc::now(),
        }
    }
}

/// Timestamps are RFC 3339 with millisecond precision and a trailing `Z`,
/// the format the log tooling keys on.
mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_serializes_as_utc_millis_with_z() {
        let event = ScanEvent {
            node: "node-1".to_string(),
            seq: 7,
            barcode: "4006381333931".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 5, 4, 12, 30, 1).unwrap(),
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains(r#""timestamp":"2025-05-04T12:30:01.000Z""#));

        let back: ScanEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn accepts_offset_timestamps() {
        let line = r#"{"node":"n","seq":1,"barcode":"x","timestamp":"2025-05-04T14:30:01.250+02:00"}"#;
        let event: ScanEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2025, 5, 4, 12, 30, 1).unwrap()
                + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn rejects_garbage_timestamps() {
        let line = r#"{"node":"n","seq":1,"barcode":"x","timestamp":"yesterday"}"#;
        assert!(serde_json::from_str::<ScanEvent>(line).is_err());
    }
}
