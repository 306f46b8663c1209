use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::model::{Reading, StoredRecord};

/// Collection that holds persisted readings.
pub const COLLECTION: &str = "pool_data";

/// Durable home of persisted readings.
///
/// Implementations assign the record timestamp themselves at write time and
/// return newest-first on read.
#[async_trait]
pub trait Store: Send + Sync {
    /// Writes `reading` as a new record. No deduplication is performed.
    async fn insert(&self, reading: Reading) -> Result<StoredRecord>;

    /// Up to `limit` records ordered by timestamp, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>>;
}

pub type StorePtr = Arc<dyn Store>;

/// Process-local store.
///
/// Timestamps are strictly increasing in insertion order, even when the clock
/// does not advance between two writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, reading: Reading) -> Result<StoredRecord> {
        let mut records = self.records.write().await;
        let timestamp = next_timestamp(records.last().map(|r| r.timestamp), Utc::now());
        let record = StoredRecord::new(reading, timestamp);
        records.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        // Appended in timestamp order.
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(device: &str) -> Reading {
        serde_json::from_value(json!({
            "device_id": device,
            "temperature_c": 20,
            "temperature_f": 68
        }))
        .unwrap()
    }

    #[test]
    fn test_next_timestamp_is_monotonic() {
        let now = Utc::now();
        assert_eq!(next_timestamp(None, now), now);
        assert_eq!(next_timestamp(Some(now), now), now + Duration::microseconds(1));
        let later = now + Duration::seconds(1);
        assert_eq!(next_timestamp(Some(now), later), later);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_first() {
        let store = MemoryStore::new();
        for device in ["a", "b", "c"] {
            store.insert(reading(device)).await.unwrap();
        }

        let latest = store.recent(2).await.unwrap();
        let devices: Vec<_> = latest.iter().map(|r| r.reading.device()).collect();
        assert_eq!(devices, vec!["c", "b"]);
        assert!(latest[0].timestamp > latest[1].timestamp);
    }

    #[test]
    fn test_recent_with_zero_limit() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.insert(reading("a")).await.unwrap();
            assert!(store.recent(0).await.unwrap().is_empty());
            assert_eq!(store.len().await, 1);
        });
    }
}
