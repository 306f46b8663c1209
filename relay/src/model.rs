use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Name of the field the store assigns at write time.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A temperature reading reported by a pool monitor.
///
/// Only the fields the relay inspects are typed; everything else the device
/// sends is carried in `extra` and passed through untouched. Temperatures are
/// kept as [`Number`] so a republished reading keeps the device's integer or
/// float representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub temperature_c: Number,
    pub temperature_f: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Reading {
    pub fn from_map(map: Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(map))
    }

    pub fn device(&self) -> &str {
        self.device_id.as_deref().unwrap_or("unknown")
    }

    /// The reading as it is persisted. The shared secret and any
    /// client-supplied `timestamp` never reach the store.
    pub fn into_document(mut self) -> Self {
        self.api_key = None;
        self.extra.remove(TIMESTAMP_FIELD);
        self
    }
}

/// A reading as persisted in `pool_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub reading: Reading,
    pub timestamp: DateTime<Utc>,
}

impl StoredRecord {
    /// Pairs a reading with its server-assigned timestamp.
    pub fn new(reading: Reading, timestamp: DateTime<Utc>) -> Self {
        Self {
            reading: reading.into_document(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reading_keeps_extra_fields() {
        let reading: Reading = serde_json::from_value(json!({
            "api_key": "k",
            "device_id": "pool-monitor-01",
            "temperature_c": 20,
            "temperature_f": 68.0,
            "battery": 91
        }))
        .unwrap();

        assert_eq!(reading.device(), "pool-monitor-01");
        assert_eq!(reading.extra["battery"], json!(91));

        let back = serde_json::to_value(&reading).unwrap();
        assert_eq!(back["temperature_c"], json!(20));
        assert_eq!(back["temperature_f"], json!(68.0));
        assert_eq!(back["api_key"], json!("k"));
    }

    #[test]
    fn test_reading_requires_temperatures() {
        let missing = json!({"device_id": "a", "temperature_c": 20});
        assert!(serde_json::from_value::<Reading>(missing).is_err());

        let null = json!({"temperature_c": null, "temperature_f": 68});
        assert!(serde_json::from_value::<Reading>(null).is_err());
    }

    #[test]
    fn test_document_drops_secret_and_client_timestamp() {
        let reading: Reading = serde_json::from_value(json!({
            "api_key": "secret",
            "device_id": "pool-monitor-01",
            "temperature_c": 20,
            "temperature_f": 68,
            "timestamp": "1999-01-01T00:00:00Z",
            "battery": 91
        }))
        .unwrap();

        let document = serde_json::to_value(reading.into_document()).unwrap();
        assert_eq!(
            document,
            json!({
                "device_id": "pool-monitor-01",
                "temperature_c": 20,
                "temperature_f": 68,
                "battery": 91
            })
        );
    }

    #[test]
    fn test_stored_record_strips_secret_and_client_timestamp() {
        let reading: Reading = serde_json::from_value(json!({
            "api_key": "secret",
            "temperature_c": 20,
            "temperature_f": 68,
            "timestamp": "1999-01-01T00:00:00Z"
        }))
        .unwrap();
        let now = Utc::now();

        let record = StoredRecord::new(reading, now);
        let value = serde_json::to_value(&record).unwrap();

        assert!(value.get("api_key").is_none());
        let rendered = value["timestamp"].as_str().unwrap();
        let parsed = DateTime::parse_from_rfc3339(rendered).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), now);
    }
}
