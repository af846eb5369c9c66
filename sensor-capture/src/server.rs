use std::future::Future;
use std::sync::Arc;

use health::{ComponentStatus, HealthRegistry};
use sensor_common::dead_letter::{
    DeadLetterRouter, DeadLetterSink, KafkaDeadLetterSink, PrintDeadLetterSink,
};
use sensor_common::normalizer::Normalizer;
use sensor_common::time::{SystemTime, TimeSource};
use time::Duration;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::publisher::BatchPublisher;
use crate::router;
use crate::sinks::kafka::KafkaSink;
use crate::sinks::print::PrintSink;
use crate::sinks::Event;

type Sinks = (
    Arc<dyn Event + Send + Sync>,
    Arc<dyn DeadLetterSink + Send + Sync>,
);

fn create_sinks(config: &Config, liveness: &HealthRegistry) -> anyhow::Result<Sinks> {
    if config.print_sink {
        // Print sink is only used for local debug, don't allow a container with it to run on prod
        liveness
            .register("print_sink", Duration::seconds(30))
            .report_status(ComponentStatus::Unhealthy);

        Ok((Arc::new(PrintSink {}), Arc::new(PrintDeadLetterSink {})))
    } else {
        let sink_liveness = liveness.register("rdkafka", Duration::seconds(30));
        let sink = KafkaSink::new(&config.kafka, config.kafka_topic.clone(), sink_liveness)?;

        // Dead letters go through the same producer, on their own topic
        let dead_letters =
            KafkaDeadLetterSink::new(sink.producer(), config.kafka_dead_letter_topic.clone());

        Ok((Arc::new(sink), Arc::new(dead_letters)))
    }
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");
    let (sink, dead_letters) =
        create_sinks(&config, &liveness).expect("failed to create sinks");

    let timesource: Arc<dyn TimeSource + Send + Sync> = Arc::new(SystemTime {});
    let publisher = BatchPublisher::new(
        sink,
        Normalizer::new(config.queue_field_convention, timesource.clone()),
        DeadLetterRouter::new(dead_letters, timesource, "ingestion"),
        config.invalid_reading_policy,
        config.batch_max_bytes,
    )
    .with_message_max_bytes(config.kafka.kafka_producer_message_max_bytes as usize);

    let app = router::router(publisher, liveness, config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("failed to serve")
}
