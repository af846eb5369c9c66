use std::time::Duration;

use common_kafka::kafka_consumer::{OffsetErr, SingleTopicConsumer};
use health::HealthHandle;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tracing::{error, info};

use crate::processor::{QueueMessage, ReadingProcessor};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to receive from kafka: {0}")]
    Recv(#[from] KafkaError),
    #[error("failed to store offset: {0}")]
    Offset(#[from] OffsetErr),
}

pub struct ConsumerLoop {
    pub consumer: SingleTopicConsumer,
    pub processor: ReadingProcessor,
    pub liveness: HealthHandle,
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

/// Receives batches until Kafka fails. Offsets of a batch are only stored
/// once every message of it was persisted or dead-lettered, so a crash in
/// between redelivers the batch.
pub async fn run(worker: ConsumerLoop) -> Result<(), ConsumerError> {
    info!(
        batch_size = worker.batch_size,
        "starting consumer loop"
    );

    loop {
        worker.liveness.report_healthy();

        let batch = worker
            .consumer
            .recv_batch(worker.batch_size, worker.batch_timeout)
            .await
            .map_err(|err| {
                // If kafka's down, we're down
                error!("failed to receive from kafka: {:?}", err);
                err
            })?;
        if batch.is_empty() {
            continue;
        }

        let (messages, offsets): (Vec<QueueMessage>, Vec<_>) = batch
            .into_iter()
            .map(|(message, offset)| (QueueMessage::from(message), offset))
            .unzip();

        worker.processor.process_batch(messages).await;

        for offset in offsets {
            offset.store()?;
        }
    }
}
