use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use health::HealthRegistry;
use sensor_common::dead_letter::DeadLetterRouter;
use sensor_common::normalizer::Normalizer;
use sensor_common::reading::FieldConvention;
use sensor_common::test_utils::{FixedTime, MemoryDeadLetterSink};

use crate::api::IngestError;
use crate::publisher::{BatchPublisher, InvalidReadingPolicy};
use crate::router::router;
use crate::sinks::{Event, QueuedReading};

pub const DEFAULT_TEST_TIME: &str = "2024-03-01T10:00:00.000000Z";

/// Keeps every flushed batch, in flush order.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<QueuedReading>>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    pub fn batches(&self) -> Vec<Vec<QueuedReading>> {
        self.batches.lock().expect("poisoned lock").clone()
    }

    pub fn readings(&self) -> Vec<QueuedReading> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Event for MemorySink {
    async fn send_batch(&self, readings: Vec<QueuedReading>) -> Result<(), IngestError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IngestError::RetryableSinkError);
        }
        self.batches.lock().expect("poisoned lock").push(readings);
        Ok(())
    }
}

pub struct TestCapture {
    pub router: Router,
    pub sink: MemorySink,
    pub dead_letters: MemoryDeadLetterSink,
}

pub fn setup_capture_router(policy: InvalidReadingPolicy, batch_max_bytes: usize) -> TestCapture {
    let sink = MemorySink::default();
    let dead_letters = MemoryDeadLetterSink::new();
    let timesource = Arc::new(FixedTime {
        time: DEFAULT_TEST_TIME.to_string(),
    });

    let publisher = BatchPublisher::new(
        Arc::new(sink.clone()),
        Normalizer::new(FieldConvention::SnakeCase, timesource.clone()),
        DeadLetterRouter::new(Arc::new(dead_letters.clone()), timesource, "ingestion"),
        policy,
        batch_max_bytes,
    );
    let liveness = HealthRegistry::new("dummy");

    TestCapture {
        router: router(publisher, liveness, false),
        sink,
        dead_letters,
    }
}
