use std::sync::Arc;
use std::time::Duration as StdDuration;

use common_kafka::kafka_producer::create_kafka_producer;
use health::{HealthHandle, HealthRegistry};
use sensor_common::dead_letter::{DeadLetterRouter, KafkaDeadLetterSink};
use sensor_common::normalizer::Normalizer;
use sensor_common::store::PgReadingStore;
use sensor_common::time::SystemTime;
use time::Duration;
use tracing::info;

use crate::config::Config;
use crate::processor::ReadingProcessor;

pub struct AppContext {
    pub liveness: HealthRegistry,
    pub worker_liveness: HealthHandle,
    pub processor: ReadingProcessor,
}

impl AppContext {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store_timeout = StdDuration::from_millis(config.store_timeout_ms);
        let store = PgReadingStore::new(
            &config.database_url,
            config.max_pg_connections,
            store_timeout,
        )
        .await?;
        if config.run_migrations {
            store.migrate().await?;
            info!("applied database migrations");
        }

        let liveness = HealthRegistry::new("liveness");
        let worker_liveness = liveness.register("worker", Duration::seconds(60));
        let producer_liveness = liveness.register("rdkafka", Duration::seconds(30));

        let producer = create_kafka_producer(&config.kafka, producer_liveness)?;
        let dead_letters =
            KafkaDeadLetterSink::new(producer, config.kafka_dead_letter_topic.clone());

        let timesource = Arc::new(SystemTime {});
        let processor = ReadingProcessor::new(
            Normalizer::new(config.store_field_convention, timesource.clone()),
            Arc::new(store),
            DeadLetterRouter::new(Arc::new(dead_letters), timesource, "processor"),
            store_timeout,
        );

        Ok(Self {
            liveness,
            worker_liveness,
            processor,
        })
    }
}
