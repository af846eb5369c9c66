use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use tracing::warn;

use crate::config::{ConsumerConfig, KafkaConfig};

/// Consumes one topic with at-least-once semantics: offsets are only
/// stored (and then auto-committed) once the caller hands them back
/// through [`Offset::store`].
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

/// A message copied out of the consumer, so it can outlive the poll.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
    ) -> Result<Self, KafkaError> {
        let mut client_config = common_config.client_config();
        client_config
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Receives up to `max` messages, returning early once `timeout` has
    /// elapsed. May return an empty batch.
    pub async fn recv_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<(ReceivedMessage, Offset)>, KafkaError> {
        let mut batch = Vec::with_capacity(max);
        let deadline = tokio::time::Instant::now() + timeout;

        while batch.len() < max {
            let message =
                match tokio::time::timeout_at(deadline, self.inner.consumer.recv()).await {
                    Err(_) => break,
                    Ok(Ok(message)) => message,
                    Ok(Err(e)) if batch.is_empty() => return Err(e),
                    Ok(Err(e)) => {
                        // Hand back what we already have, the next poll will surface
                        // the error again if it persists
                        warn!("kafka error while filling batch: {:?}", e);
                        break;
                    }
                };

            let received = ReceivedMessage {
                payload: message.payload().map(<[u8]>::to_vec),
                partition: message.partition(),
                offset: message.offset(),
            };
            let offset = Offset {
                handle: Arc::downgrade(&self.inner),
                partition: received.partition,
                offset: received.offset,
            };
            batch.push((received, offset));
        }

        Ok(batch)
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        // The committed offset is the next one to read
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset + 1)?;
        Ok(())
    }
}
