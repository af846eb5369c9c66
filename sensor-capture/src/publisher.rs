use std::mem;
use std::str::FromStr;
use std::sync::Arc;

use metrics::counter;
use sensor_common::dead_letter::DeadLetterRouter;
use sensor_common::metrics::{report_dropped_readings, READINGS_RECEIVED_TOTAL};
use sensor_common::normalizer::Normalizer;
use sensor_common::validator::{missing_fields, Rejection};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::api::IngestError;
use crate::sinks::{Event, QueuedReading};

/// What to do with readings rejected at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReadingPolicy {
    DeadLetter,
    Drop,
}

impl FromStr for InvalidReadingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "dead_letter" | "deadletter" => Ok(InvalidReadingPolicy::DeadLetter),
            "drop" => Ok(InvalidReadingPolicy::Drop),
            _ => Err(format!("Unknown invalid reading policy: {s}")),
        }
    }
}

/// Readings flushed to the queue together. The capacity bounds the sum of
/// payload sizes.
#[derive(Debug)]
pub struct EventBatch {
    capacity: usize,
    size: usize,
    readings: Vec<QueuedReading>,
}

impl EventBatch {
    pub fn new(capacity: usize) -> Self {
        EventBatch {
            capacity,
            size: 0,
            readings: Vec::new(),
        }
    }

    pub fn fits(&self, reading: &QueuedReading) -> bool {
        self.size + reading.payload.len() <= self.capacity
    }

    /// Appends without checking capacity, callers check [`EventBatch::fits`] first.
    pub fn add(&mut self, reading: QueuedReading) {
        self.size += reading.payload.len();
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    pub fn into_readings(self) -> Vec<QueuedReading> {
        self.readings
    }
}

/// Normalizes incoming readings, sets aside the ones missing required
/// fields, and hands the rest to the sink in batches that stay within
/// `batch_max_bytes`.
#[derive(Clone)]
pub struct BatchPublisher {
    sink: Arc<dyn Event + Send + Sync>,
    normalizer: Normalizer,
    dead_letter: DeadLetterRouter,
    policy: InvalidReadingPolicy,
    batch_max_bytes: usize,
    message_max_bytes: usize,
}

impl BatchPublisher {
    pub fn new(
        sink: Arc<dyn Event + Send + Sync>,
        normalizer: Normalizer,
        dead_letter: DeadLetterRouter,
        policy: InvalidReadingPolicy,
        batch_max_bytes: usize,
    ) -> Self {
        BatchPublisher {
            sink,
            normalizer,
            dead_letter,
            policy,
            batch_max_bytes,
            message_max_bytes: batch_max_bytes,
        }
    }

    /// Largest single payload the transport accepts. Readings above it are
    /// rejected like any other invalid reading instead of failing the flush.
    pub fn with_message_max_bytes(mut self, message_max_bytes: usize) -> Self {
        self.message_max_bytes = message_max_bytes;
        self
    }

    /// Returns how many readings were handed to the sink. A sink failure
    /// aborts the call, batches flushed before it stay delivered.
    #[instrument(skip_all, fields(readings = readings.len()))]
    pub async fn publish(&self, readings: Vec<Value>) -> Result<usize, IngestError> {
        counter!(READINGS_RECEIVED_TOTAL).increment(readings.len() as u64);

        let mut batch = EventBatch::new(self.batch_max_bytes);
        let mut published = 0;

        for raw in readings {
            let Value::Object(fields) = &raw else {
                self.reject(raw, "reading is not a JSON object".to_string(), "not_an_object")
                    .await;
                continue;
            };

            let normalized = self.normalizer.normalize(fields.clone());
            let missing = missing_fields(&normalized);
            if !missing.is_empty() {
                let reason = Rejection::MissingFields(missing).to_string();
                self.reject(raw, reason, "missing_fields").await;
                continue;
            }

            let payload = normalized.to_json();
            if payload.len() > self.batch_max_bytes {
                let reason = format!(
                    "reading exceeds maximum batch size: {} bytes",
                    payload.len()
                );
                self.reject(raw, reason, "reading_too_big").await;
                continue;
            }
            if payload.len() > self.message_max_bytes {
                let reason = format!(
                    "reading exceeds maximum message size: {} bytes",
                    payload.len()
                );
                self.reject(raw, reason, "reading_too_big").await;
                continue;
            }

            let reading = QueuedReading {
                key: normalized.key(),
                payload,
            };
            if !batch.fits(&reading) {
                let full = mem::replace(&mut batch, EventBatch::new(self.batch_max_bytes));
                published += self.flush(full).await?;
            }
            batch.add(reading);
        }

        if !batch.is_empty() {
            published += self.flush(batch).await?;
        }

        Ok(published)
    }

    async fn flush(&self, batch: EventBatch) -> Result<usize, IngestError> {
        let count = batch.len();
        debug!(
            count,
            bytes = batch.size_in_bytes(),
            "flushing batch of readings"
        );
        self.sink.send_batch(batch.into_readings()).await?;
        Ok(count)
    }

    async fn reject(&self, raw: Value, reason: String, cause: &'static str) {
        match self.policy {
            InvalidReadingPolicy::DeadLetter => self.dead_letter.route(raw, reason).await,
            InvalidReadingPolicy::Drop => {
                report_dropped_readings(cause, 1);
                warn!("dropping reading: {}", reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration_test_utils::MemorySink;
    use sensor_common::reading::FieldConvention;
    use sensor_common::test_utils::{FixedTime, MemoryDeadLetterSink};
    use serde_json::json;

    fn publisher(
        policy: InvalidReadingPolicy,
        batch_max_bytes: usize,
    ) -> (BatchPublisher, MemorySink, MemoryDeadLetterSink) {
        let sink = MemorySink::default();
        let dead_letters = MemoryDeadLetterSink::new();
        let timesource = Arc::new(FixedTime {
            time: "2024-03-01T10:00:00.000000Z".to_string(),
        });
        let publisher = BatchPublisher::new(
            Arc::new(sink.clone()),
            Normalizer::new(FieldConvention::SnakeCase, timesource.clone()),
            DeadLetterRouter::new(Arc::new(dead_letters.clone()), timesource, "ingestion"),
            policy,
            batch_max_bytes,
        );
        (publisher, sink, dead_letters)
    }

    fn reading(id: usize) -> Value {
        json!({
            "id": format!("r{id:03}"),
            "sensorId": "s1",
            "sensorType": "temperature",
            "value": 20.0,
            "unit": "°C",
            "timestamp": "2024-03-01T09:00:00.000000Z"
        })
    }

    #[test]
    fn parse_policy() {
        assert_eq!(
            "dead_letter".parse::<InvalidReadingPolicy>(),
            Ok(InvalidReadingPolicy::DeadLetter)
        );
        assert_eq!(
            "DROP".parse::<InvalidReadingPolicy>(),
            Ok(InvalidReadingPolicy::Drop)
        );
        assert!("retry".parse::<InvalidReadingPolicy>().is_err());
    }

    #[tokio::test]
    async fn publishes_normalized_readings() {
        let (publisher, sink, dead_letters) = publisher(InvalidReadingPolicy::DeadLetter, 1024);

        let published = publisher
            .publish(vec![json!({"sensorId": "s1", "sensorType": "temperature", "value": 22.5, "unit": "°C"})])
            .await
            .expect("failed to publish");

        assert_eq!(published, 1);
        assert!(dead_letters.records().is_empty());
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);

        let queued = &batches[0][0];
        let payload: Value = serde_json::from_str(&queued.payload).expect("invalid payload");
        assert_eq!(payload["sensor_id"], json!("s1"));
        assert_eq!(payload["sensor_type"], json!("temperature"));
        assert_eq!(payload["timestamp"], json!("2024-03-01T10:00:00.000000Z"));
        assert!(payload.get("sensorId").is_none());
        assert_eq!(queued.key.as_deref(), payload["id"].as_str());
    }

    #[tokio::test]
    async fn splits_batches_at_capacity() {
        let payload_size = {
            let (publisher, sink, _) = publisher(InvalidReadingPolicy::DeadLetter, 1024);
            publisher
                .publish(vec![reading(0)])
                .await
                .expect("failed to publish");
            sink.readings()[0].payload.len()
        };

        // Room for two readings per batch, but not three
        let capacity = payload_size * 2 + payload_size / 2;
        let (publisher, sink, _) = publisher(InvalidReadingPolicy::DeadLetter, capacity);
        let readings: Vec<Value> = (0..5).map(reading).collect();

        let published = publisher
            .publish(readings)
            .await
            .expect("failed to publish");
        assert_eq!(published, 5);

        let batches = sink.batches();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        for batch in &batches {
            let bytes: usize = batch.iter().map(|reading| reading.payload.len()).sum();
            assert!(bytes <= capacity);
        }

        // Every reading exactly once, in order
        let keys: Vec<String> = sink
            .readings()
            .into_iter()
            .filter_map(|reading| reading.key)
            .collect();
        assert_eq!(keys, vec!["r000", "r001", "r002", "r003", "r004"]);
    }

    #[tokio::test]
    async fn dead_letters_incomplete_readings() {
        let (publisher, sink, dead_letters) = publisher(InvalidReadingPolicy::DeadLetter, 1024);
        let incomplete = json!({"sensor_type": "humidity", "value": 30.0, "unit": "%"});

        let published = publisher
            .publish(vec![incomplete.clone(), reading(1), json!(42)])
            .await
            .expect("failed to publish");

        assert_eq!(published, 1);
        assert_eq!(sink.readings().len(), 1);

        let records = dead_letters.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].error, "missing required fields: ['sensor_id']");
        assert_eq!(records[0].original_data, incomplete);
        assert_eq!(records[1].error, "reading is not a JSON object");
        assert_eq!(records[1].original_data, json!(42));
    }

    #[tokio::test]
    async fn drop_policy_skips_dead_letters() {
        let (publisher, sink, dead_letters) = publisher(InvalidReadingPolicy::Drop, 1024);

        let published = publisher
            .publish(vec![json!({"value": 1.0}), reading(1)])
            .await
            .expect("failed to publish");

        assert_eq!(published, 1);
        assert_eq!(sink.readings().len(), 1);
        assert!(dead_letters.records().is_empty());
    }

    #[tokio::test]
    async fn rejects_reading_larger_than_a_batch() {
        let (publisher, sink, dead_letters) = publisher(InvalidReadingPolicy::DeadLetter, 200);
        let mut huge = reading(1);
        huge["notes"] = json!("x".repeat(500));

        let published = publisher
            .publish(vec![huge, reading(2)])
            .await
            .expect("failed to publish");

        assert_eq!(published, 1);
        assert_eq!(sink.readings().len(), 1);
        let records = dead_letters.records();
        assert_eq!(records.len(), 1);
        assert!(records[0]
            .error
            .starts_with("reading exceeds maximum batch size: "));
    }

    #[tokio::test]
    async fn rejects_reading_larger_than_a_message() {
        let (publisher, sink, dead_letters) = publisher(InvalidReadingPolicy::DeadLetter, 4096);
        let publisher = publisher.with_message_max_bytes(300);
        let mut large = reading(1);
        large["notes"] = json!("x".repeat(500));

        let published = publisher
            .publish(vec![reading(0), large.clone(), reading(2)])
            .await
            .expect("failed to publish");

        // The batch still goes out, only the large reading is set aside
        assert_eq!(published, 2);
        let keys: Vec<String> = sink
            .readings()
            .into_iter()
            .filter_map(|reading| reading.key)
            .collect();
        assert_eq!(keys, vec!["r000", "r002"]);

        let records = dead_letters.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_data, large);
        assert!(records[0]
            .error
            .starts_with("reading exceeds maximum message size: "));
    }

    #[tokio::test]
    async fn sink_failure_aborts_publish() {
        let (publisher, sink, _) = publisher(InvalidReadingPolicy::DeadLetter, 1024);
        sink.set_failing(true);

        match publisher.publish(vec![reading(1)]).await {
            Err(IngestError::RetryableSinkError) => {}
            Err(err) => panic!("wrong error {err}"),
            Ok(count) => panic!("should have failed, published {count}"),
        }
    }

    #[tokio::test]
    async fn empty_request_publishes_nothing() {
        let (publisher, sink, _) = publisher(InvalidReadingPolicy::DeadLetter, 1024);

        let published = publisher.publish(vec![]).await.expect("failed to publish");

        assert_eq!(published, 0);
        assert!(sink.batches().is_empty());
    }
}
