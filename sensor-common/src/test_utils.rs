//! In-memory stand-ins for the external systems, used by tests and by the
//! pipeline tests of the service crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

use crate::dead_letter::{DeadLetterError, DeadLetterRecord, DeadLetterSink};
use crate::reading::SensorReading;
use crate::store::{HistoryQuery, ReadingStore, StoreError};
use crate::time::TimeSource;

/// Fixed timesource, for deterministic timestamps.
#[derive(Clone)]
pub struct FixedTime {
    pub time: String,
}

impl TimeSource for FixedTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::parse(&self.time, &Iso8601::DEFAULT).expect("invalid fixed time")
    }

    fn current_time(&self) -> String {
        self.time.to_string()
    }
}

#[derive(Clone, Default)]
pub struct MemoryDeadLetterSink {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().expect("poisoned lock").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn send(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeadLetterError::Unavailable("sink set to fail".to_string()));
        }
        self.records.lock().expect("poisoned lock").push(record);
        Ok(())
    }
}

/// Readings keyed by id, behaving like the Postgres store. Readings are
/// kept as JSON documents and decoded on the way out.
#[derive(Clone, Default)]
pub struct MemoryReadingStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SensorReading> {
        let document = self.documents.read().expect("poisoned lock").get(id).cloned()?;
        Some(serde_json::from_value(document).expect("invalid stored document"))
    }

    pub fn len(&self) -> usize {
        self.documents.read().expect("poisoned lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn upsert(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.check_available()?;
        let document = serde_json::to_value(reading)?;
        self.documents
            .write()
            .expect("poisoned lock")
            .insert(reading.id.clone(), document);
        Ok(())
    }

    async fn query(&self, query: &HistoryQuery) -> Result<Vec<SensorReading>, StoreError> {
        self.check_available()?;
        let documents = self.documents.read().expect("poisoned lock").clone();
        let mut found = Vec::new();
        for document in documents.into_values() {
            let reading: SensorReading = serde_json::from_value(document)?;
            if query.matches(&reading) {
                found.push(reading);
            }
        }

        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(query.limit);
        Ok(found)
    }
}
