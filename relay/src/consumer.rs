//! Persistence side of the channel.
//!
//! [`Consumer::consume`] never reports failure to whoever delivered the
//! message. An undecodable message would be redelivered forever, so it is
//! logged and dropped instead; the same goes for store write failures.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::errors::Result;
use crate::metrics::{DROPPED_MESSAGES_TOTAL, STORED_TOTAL, STORE_FAILURES_TOTAL};
use crate::model::{Reading, StoredRecord};
use crate::store::{StorePtr, COLLECTION};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Stored(StoredRecord),
    Dropped,
}

pub struct Consumer {
    store: StorePtr,
}

impl Consumer {
    pub fn new(store: StorePtr) -> Self {
        Self { store }
    }

    /// Decodes one raw channel message and writes it to the store.
    pub async fn consume(&self, raw: &[u8]) -> ConsumeOutcome {
        match self.try_consume(raw).await {
            Ok(record) => {
                STORED_TOTAL.inc();
                info!(
                    "Stored reading from {} in {} at {}",
                    record.reading.device(),
                    COLLECTION,
                    record.timestamp
                );
                ConsumeOutcome::Stored(record)
            }
            Err(e) if e.is_poison() => {
                DROPPED_MESSAGES_TOTAL.inc();
                warn!("Discarding undecodable channel message: {}", e);
                ConsumeOutcome::Dropped
            }
            Err(e) => {
                DROPPED_MESSAGES_TOTAL.inc();
                STORE_FAILURES_TOTAL.inc();
                error!("Error processing channel message, dropping it: {}", e);
                ConsumeOutcome::Dropped
            }
        }
    }

    async fn try_consume(&self, raw: &[u8]) -> Result<StoredRecord> {
        let envelope = Envelope::parse(raw)?;
        let payload = envelope.payload()?;
        let reading: Reading = serde_json::from_str(&payload)?;

        debug!(
            "Received channel message {} from {}",
            envelope.message_id(),
            reading.device()
        );

        self.store.insert(reading).await
    }
}

/// Feeds messages from an in-process channel to the consumer, one at a time.
pub async fn run_channel(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, consumer: Arc<Consumer>) {
    info!("Consuming readings from in-process channel");
    while let Some(raw) = rx.recv().await {
        consumer.consume(&raw).await;
    }
    info!("In-process channel closed, consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::store::{MemoryStore, Store};
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        async fn insert(&self, _reading: Reading) -> Result<StoredRecord> {
            Err(Error::Database(sqlx::Error::PoolTimedOut))
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<StoredRecord>> {
            Err(Error::Database(sqlx::Error::PoolTimedOut))
        }
    }

    fn message(payload: &[u8]) -> Vec<u8> {
        Envelope::wrap(payload).to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_consume_valid_message() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::new(store.clone());

        let raw = message(
            br#"{"api_key":"k","device_id":"A","temperature_c":20,"temperature_f":68,"timestamp":"2001-01-01T00:00:00Z"}"#,
        );
        let ConsumeOutcome::Stored(record) = consumer.consume(&raw).await else {
            panic!("expected the reading to be stored");
        };

        assert_eq!(record.reading.device_id.as_deref(), Some("A"));
        assert_eq!(record.reading.api_key, None);
        assert!(!record.reading.extra.contains_key("timestamp"));
        assert!(record.timestamp.timestamp() > 978_307_200);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_consume_drops_poison_messages() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::new(store.clone());

        let poison = vec![
            b"not an envelope".to_vec(),
            br#"{"message":{"data":"%%%"}}"#.to_vec(),
            message(&[0xc3, 0x28]),
            message(b"{not json"),
            message(br#"{"device_id":"A","temperature_c":20}"#),
            message(br#"[1, 2, 3]"#),
        ];

        for raw in poison {
            assert_eq!(consumer.consume(&raw).await, ConsumeOutcome::Dropped);
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_consume_swallows_store_failure() {
        let consumer = Consumer::new(Arc::new(BrokenStore));
        let raw = message(br#"{"temperature_c":20,"temperature_f":68}"#);
        assert_eq!(consumer.consume(&raw).await, ConsumeOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_stored_twice() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Consumer::new(store.clone());
        let raw = message(br#"{"device_id":"A","temperature_c":20,"temperature_f":68}"#);

        consumer.consume(&raw).await;
        consumer.consume(&raw).await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_run_channel_drains_until_closed() {
        let store = Arc::new(MemoryStore::new());
        let consumer = Arc::new(Consumer::new(store.clone()));
        let (tx, rx) = mpsc::unbounded_channel();

        for c in [20, 21, 22] {
            let payload = json!({"device_id": "A", "temperature_c": c, "temperature_f": 68});
            tx.send(message(payload.to_string().as_bytes())).unwrap();
        }
        drop(tx);

        run_channel(rx, consumer).await;
        assert_eq!(store.len().await, 3);
    }
}
