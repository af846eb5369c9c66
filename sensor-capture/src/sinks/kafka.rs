use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{
    await_ack, create_kafka_producer, enqueue, KafkaContext, KafkaProduceError,
};
use health::HealthHandle;
use metrics::{counter, histogram};
use rdkafka::producer::{DeliveryFuture, FutureProducer};
use sensor_common::metrics::{report_dropped_readings, PUBLISH_BATCH_SIZE, READINGS_PUBLISHED_TOTAL};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, instrument, Instrument};

use crate::api::IngestError;
use crate::sinks::{Event, QueuedReading};

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaSink {
    pub fn new(
        config: &KafkaConfig,
        topic: String,
        liveness: HealthHandle,
    ) -> anyhow::Result<KafkaSink> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);
        let producer = create_kafka_producer(config, liveness)?;

        Ok(KafkaSink { producer, topic })
    }

    /// The underlying producer, to share the connection with the dead-letter sink.
    pub fn producer(&self) -> FutureProducer<KafkaContext> {
        self.producer.clone()
    }

    fn kafka_send(&self, reading: QueuedReading) -> Result<DeliveryFuture, IngestError> {
        enqueue(
            &self.producer,
            &self.topic,
            reading.key.as_deref(),
            &reading.payload,
        )
        .map_err(handle_produce_error)
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<(), IngestError> {
        await_ack(delivery).await.map_err(handle_produce_error)?;
        counter!(READINGS_PUBLISHED_TOTAL).increment(1);
        Ok(())
    }
}

fn handle_produce_error(err: KafkaProduceError) -> IngestError {
    match err {
        KafkaProduceError::MessageTooLarge => {
            report_dropped_readings("kafka_message_size", 1);
            IngestError::EventTooBig
        }
        KafkaProduceError::KafkaProduceCanceled => {
            counter!("sensor_kafka_produce_errors_total").increment(1);
            error!("failed to produce to Kafka before write timeout");
            IngestError::RetryableSinkError
        }
        KafkaProduceError::KafkaProduceError { error } => {
            counter!("sensor_kafka_produce_errors_total").increment(1);
            report_dropped_readings("kafka_write_error", 1);
            error!("failed to produce to Kafka: {}", error);
            IngestError::RetryableSinkError
        }
    }
}

#[async_trait]
impl Event for KafkaSink {
    #[instrument(skip_all, fields(batch_size = readings.len()))]
    async fn send_batch(&self, readings: Vec<QueuedReading>) -> Result<(), IngestError> {
        let mut set = JoinSet::new();
        let batch_size = readings.len();
        for reading in readings {
            // Enqueue sequentially to keep the batch order in the producer queue
            let ack = self.kafka_send(reading)?;

            // Then wait concurrently for the write ACKs from brokers.
            set.spawn(Self::process_ack(ack));
        }

        // Await on all the produce promises, fail batch on first failure
        async move {
            while let Some(res) = set.join_next().await {
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        set.abort_all();
                        return Err(err);
                    }
                    Err(err) => {
                        set.abort_all();
                        error!("join error while waiting on Kafka ACK: {:?}", err);
                        return Err(IngestError::RetryableSinkError);
                    }
                }
            }
            Ok(())
        }
        .instrument(info_span!("ack_wait_many"))
        .await?;

        histogram!(PUBLISH_BATCH_SIZE).record(batch_size as f64);
        Ok(())
    }
}
