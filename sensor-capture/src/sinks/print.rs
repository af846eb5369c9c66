use async_trait::async_trait;
use metrics::{counter, histogram};
use sensor_common::metrics::{PUBLISH_BATCH_SIZE, READINGS_PUBLISHED_TOTAL};
use tracing::info;

use crate::api::IngestError;
use crate::sinks::{Event, QueuedReading};

pub struct PrintSink {}

#[async_trait]
impl Event for PrintSink {
    async fn send_batch(&self, readings: Vec<QueuedReading>) -> Result<(), IngestError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of readings");
        let _enter = span.enter();

        histogram!(PUBLISH_BATCH_SIZE).record(readings.len() as f64);
        counter!(READINGS_PUBLISHED_TOTAL).increment(readings.len() as u64);
        for reading in readings {
            info!("reading: {:?}", reading);
        }

        Ok(())
    }
}
