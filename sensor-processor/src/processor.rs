use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::ReceivedMessage;
use metrics::{counter, histogram};
use sensor_common::dead_letter::DeadLetterRouter;
use sensor_common::metrics::{CONSUME_BATCH_SIZE, READINGS_PERSISTED_TOTAL};
use sensor_common::normalizer::Normalizer;
use sensor_common::reading::json_type_name;
use sensor_common::store::{ReadingStore, StoreError};
use sensor_common::validator::validate;
use serde_json::Value;
use tracing::{debug, instrument};

/// One message taken off the queue. The payload is absent for tombstones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    pub payload: Option<Vec<u8>>,
}

impl From<ReceivedMessage> for QueueMessage {
    fn from(message: ReceivedMessage) -> Self {
        QueueMessage {
            payload: message.payload,
        }
    }
}

impl From<&str> for QueueMessage {
    fn from(payload: &str) -> Self {
        QueueMessage {
            payload: Some(payload.as_bytes().to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub persisted: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Persisted,
    DeadLettered,
}

/// Turns queued messages into stored readings. Every message ends up either
/// upserted by id or on the dead-letter channel, a batch never fails as a
/// whole.
#[derive(Clone)]
pub struct ReadingProcessor {
    normalizer: Normalizer,
    store: Arc<dyn ReadingStore + Send + Sync>,
    dead_letter: DeadLetterRouter,
    store_timeout: Duration,
}

impl ReadingProcessor {
    pub fn new(
        normalizer: Normalizer,
        store: Arc<dyn ReadingStore + Send + Sync>,
        dead_letter: DeadLetterRouter,
        store_timeout: Duration,
    ) -> Self {
        ReadingProcessor {
            normalizer,
            store,
            dead_letter,
            store_timeout,
        }
    }

    #[instrument(skip_all, fields(batch_size = messages.len()))]
    pub async fn process_batch(&self, messages: Vec<QueueMessage>) -> BatchSummary {
        histogram!(CONSUME_BATCH_SIZE).record(messages.len() as f64);

        let mut summary = BatchSummary::default();
        for message in messages {
            match self.process_message(message).await {
                Outcome::Persisted => summary.persisted += 1,
                Outcome::DeadLettered => summary.dead_lettered += 1,
            }
        }

        debug!(
            persisted = summary.persisted,
            dead_lettered = summary.dead_lettered,
            "processed batch"
        );
        summary
    }

    pub async fn process_message(&self, message: QueueMessage) -> Outcome {
        let payload = message.payload.unwrap_or_default();
        // Dead letters carry the payload exactly as it was queued
        let original = || Value::String(String::from_utf8_lossy(&payload).into_owned());

        let fields = match serde_json::from_slice::<Value>(&payload) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                let reason = format!(
                    "JSON parse error: expected an object, found {}",
                    json_type_name(&other)
                );
                return self.reject(original(), reason).await;
            }
            Err(err) => {
                return self
                    .reject(original(), format!("JSON parse error: {err}"))
                    .await
            }
        };

        let normalized = self.normalizer.normalize(fields);
        let reading = match validate(&normalized) {
            Ok(reading) => reading,
            Err(rejection) => return self.reject(original(), rejection.to_string()).await,
        };

        let upsert = tokio::time::timeout(self.store_timeout, self.store.upsert(&reading));
        match upsert.await.unwrap_or(Err(StoreError::Timeout(self.store_timeout))) {
            Ok(()) => {
                counter!(READINGS_PERSISTED_TOTAL).increment(1);
                debug!(id = %reading.id, "saved reading");
                Outcome::Persisted
            }
            Err(err) => {
                self.reject(original(), format!("processing error: {err}"))
                    .await
            }
        }
    }

    async fn reject(&self, original: Value, reason: String) -> Outcome {
        self.dead_letter.route(original, reason).await;
        Outcome::DeadLettered
    }
}
