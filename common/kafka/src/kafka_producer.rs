use std::time::Duration;

use health::HealthHandle;
use metrics::gauge;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("sensor_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("sensor_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("sensor_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("sensor_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            gauge!(
                "sensor_kafka_produce_avg_batch_size_events",
                "topic" => topic
            )
            .set(stats.batchcnt.avg as f64);
        }
    }
}

pub fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = config.client_config();
    client_config
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.max.bytes",
            config.kafka_producer_message_max_bytes.to_string(),
        )
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set("compression.codec", &config.kafka_compression_codec)
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(liveness.into())?;

    // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
    match producer
        .client()
        .fetch_metadata(None, Timeout::After(Duration::from_secs(10)))
    {
        Ok(metadata) => {
            info!(
                "connected to Kafka brokers at {}, found {} topics",
                config.kafka_hosts,
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("message is larger than the broker accepts")]
    MessageTooLarge,
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

impl From<KafkaError> for KafkaProduceError {
    fn from(error: KafkaError) -> Self {
        match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::MessageSizeTooLarge) => KafkaProduceError::MessageTooLarge,
            _ => KafkaProduceError::KafkaProduceError { error },
        }
    }
}

/// Puts one payload in the producer queue. The returned future resolves
/// once the brokers acknowledged the write, see [`await_ack`].
pub fn enqueue<C: ClientContext + 'static>(
    producer: &FutureProducer<C>,
    topic: &str,
    key: Option<&str>,
    payload: &str,
) -> Result<DeliveryFuture, KafkaProduceError> {
    let record = FutureRecord {
        topic,
        key,
        payload: Some(payload),
        partition: None,
        timestamp: None,
        headers: None,
    };

    producer.send_result(record).map_err(|(e, _)| e.into())
}

pub async fn await_ack(delivery: DeliveryFuture) -> Result<(), KafkaProduceError> {
    match delivery.await {
        // Cancelled due to timeout while retrying
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
        Ok(Err((error, _))) => Err(error.into()),
        Ok(Ok(_)) => Ok(()),
    }
}

/// Enqueues and waits for the acknowledgement of a single payload.
pub async fn send_one<C: ClientContext + 'static>(
    producer: &FutureProducer<C>,
    topic: &str,
    key: Option<&str>,
    payload: &str,
) -> Result<(), KafkaProduceError> {
    let delivery = enqueue(producer, topic, key, payload)?;
    await_ack(delivery).await
}
