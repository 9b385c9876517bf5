// ── Device snapshot ──

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use devwatch_api::DeviceRecord;

/// Which delivery path produced a snapshot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateSource {
    /// Pushed over the update topic.
    Push,
    /// Fetched by the status poll fallback.
    Poll,
}

/// Materialized device state: identity, details, latest telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub phone_number: String,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    /// When the device produced this data, if the payload says so.
    pub responded_at: Option<DateTime<Utc>>,
    pub details: Value,
    pub telemetry: Value,
    pub source: UpdateSource,
}

impl DeviceSnapshot {
    /// Build a snapshot from a pushed payload.
    ///
    /// `details` is the payload's `deviceDetails` object when present,
    /// otherwise the payload itself (flat device documents). Telemetry
    /// comes from `latestTelemetry` or `deviceTelemetry`.
    pub fn from_push(payload: Value, entity: &str) -> Self {
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(String::from);

        let phone_number = text("phoneNumber").unwrap_or_else(|| entity.to_owned());
        let device_id = text("deviceId");
        let session_id = text("sessionId");
        let responded_at = ["responseTime", "timestamp", "lastUpdated"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(parse_timestamp));
        let telemetry = payload
            .get("latestTelemetry")
            .or_else(|| payload.get("deviceTelemetry"))
            .cloned()
            .unwrap_or(Value::Null);
        let details = match payload.get("deviceDetails") {
            Some(details) => details.clone(),
            None => payload,
        };

        Self {
            phone_number,
            device_id,
            session_id,
            responded_at,
            details,
            telemetry,
            source: UpdateSource::Push,
        }
    }

    /// Build a snapshot from a device-list record fetched by the poll path.
    pub fn from_record(record: DeviceRecord, session_id: Option<String>) -> Self {
        Self {
            responded_at: record.last_updated.as_ref().and_then(parse_timestamp),
            phone_number: record.phone_number,
            device_id: record.device_id,
            session_id,
            details: record.device_details,
            telemetry: record.latest_telemetry,
            source: UpdateSource::Poll,
        }
    }

    /// Fill identity fields the payload itself did not carry.
    pub(crate) fn with_envelope(
        mut self,
        device_id: Option<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        if self.device_id.is_none() {
            self.device_id = device_id;
        }
        if self.responded_at.is_none() {
            self.responded_at = timestamp;
        }
        self
    }
}

/// Metadata about the payload behind the last commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadInfo {
    pub compressed: bool,
    /// Size of the materialized JSON text in bytes.
    pub byte_size: u64,
    /// Number of chunks it arrived in; 0 when not chunked.
    pub chunk_count: u32,
}

/// Parse a backend timestamp: RFC 3339, a zone-less ISO local datetime
/// (read as UTC), or epoch milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn push_payload_with_nested_details() {
        let snap = DeviceSnapshot::from_push(
            json!({
                "phoneNumber": "555",
                "deviceId": "d-1",
                "responseTime": "2026-10-01T12:00:00Z",
                "deviceDetails": { "model": "Pixel 9" },
                "deviceTelemetry": { "battery": 80 },
            }),
            "555",
        );
        assert_eq!(snap.device_id.as_deref(), Some("d-1"));
        assert_eq!(snap.details, json!({ "model": "Pixel 9" }));
        assert_eq!(snap.telemetry, json!({ "battery": 80 }));
        assert_eq!(
            snap.responded_at.map(|t| t.to_rfc3339()),
            Some("2026-10-01T12:00:00+00:00".to_owned())
        );
        assert_eq!(snap.source, UpdateSource::Push);
    }

    #[test]
    fn flat_push_payload_becomes_details() {
        let payload = json!({ "model": "Pixel 9", "batteryLevel": 42 });
        let snap = DeviceSnapshot::from_push(payload.clone(), "555");
        assert_eq!(snap.phone_number, "555");
        assert_eq!(snap.details, payload);
        assert_eq!(snap.telemetry, Value::Null);
    }

    #[test]
    fn record_snapshot_is_poll_sourced() {
        let record: DeviceRecord = serde_json::from_value(json!({
            "deviceId": "d-2",
            "phoneNumber": "777",
            "lastUpdated": 1_790_000_000_000_i64,
            "deviceDetails": { "model": "A" },
            "latestTelemetry": { "signal": -70 },
        }))
        .unwrap();

        let snap = DeviceSnapshot::from_record(record, Some("s-1".into()));
        assert_eq!(snap.source, UpdateSource::Poll);
        assert_eq!(snap.session_id.as_deref(), Some("s-1"));
        assert_eq!(snap.telemetry, json!({ "signal": -70 }));
        assert!(snap.responded_at.is_some());
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp(&json!("2026-10-01T12:00:00.123")).is_some());
        assert!(parse_timestamp(&json!("2026-10-01T12:00:00+02:00")).is_some());
        assert!(parse_timestamp(&json!(0)).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}
