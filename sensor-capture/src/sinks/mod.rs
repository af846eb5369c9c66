use async_trait::async_trait;

use crate::api::IngestError;

pub mod kafka;
pub mod print;

/// One normalized reading, serialized and ready for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedReading {
    pub key: Option<String>,
    pub payload: String,
}

#[async_trait]
pub trait Event {
    /// Deliver a whole batch. Fails if any reading of the batch failed.
    async fn send_batch(&self, readings: Vec<QueuedReading>) -> Result<(), IngestError>;
}
