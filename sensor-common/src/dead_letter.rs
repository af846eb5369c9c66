use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::kafka_producer::{send_one, KafkaContext, KafkaProduceError};
use metrics::counter;
use rdkafka::producer::FutureProducer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics::{DEAD_LETTERED_TOTAL, DEAD_LETTER_FAILURES_TOTAL};
use crate::time::TimeSource;

/// What lands on the dead-letter channel: the input as it was received,
/// the reason it could not be processed, and when that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub error: String,
    pub original_data: Value,
    pub timestamp: String,
}

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("failed to serialize dead letter record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Produce(#[from] KafkaProduceError),
    #[error("dead letter channel unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError>;
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: String) -> Self {
        KafkaDeadLetterSink { producer, topic }
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let payload = serde_json::to_string(&record)?;
        send_one(&self.producer, &self.topic, None, &payload).await?;
        Ok(())
    }
}

/// Logs dead letters instead of delivering them, for local runs.
pub struct PrintDeadLetterSink {}

#[async_trait]
impl DeadLetterSink for PrintDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        info!("dead letter: {:?}", record);
        Ok(())
    }
}

/// Hands rejected inputs to a [`DeadLetterSink`]. Routing never fails: a
/// record the sink cannot take is logged and dropped.
#[derive(Clone)]
pub struct DeadLetterRouter {
    sink: Arc<dyn DeadLetterSink + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    stage: &'static str,
}

impl DeadLetterRouter {
    pub fn new(
        sink: Arc<dyn DeadLetterSink + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        stage: &'static str,
    ) -> Self {
        DeadLetterRouter {
            sink,
            timesource,
            stage,
        }
    }

    pub async fn route(&self, original: Value, reason: impl Into<String>) {
        let record = DeadLetterRecord {
            error: reason.into(),
            original_data: original,
            timestamp: self.timesource.current_time(),
        };
        let reason = record.error.clone();

        match self.sink.send(record).await {
            Ok(()) => {
                counter!(DEAD_LETTERED_TOTAL, "stage" => self.stage).increment(1);
                warn!(stage = self.stage, "sent reading to dead letter channel: {}", reason);
            }
            Err(err) => {
                counter!(DEAD_LETTER_FAILURES_TOTAL, "stage" => self.stage).increment(1);
                error!(
                    stage = self.stage,
                    "failed to dead letter reading ({}): {}", reason, err
                );
            }
        }
    }
}
