use std::time::Duration;

use axum::{routing::get, Router};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use envconfig::Envconfig;
use futures::future::ready;
use health::HealthRegistry;
use sensor_common::metrics::{serve, setup_metrics_routes};
use sensor_processor::app_context::AppContext;
use sensor_processor::config::Config;
use sensor_processor::consumer::{run, ConsumerLoop};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "sensor processor"
}

fn start_health_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let consumer = SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())?;
    let context = AppContext::new(&config).await?;

    info!(
        "Subscribed to topic: {}",
        config.consumer.kafka_consumer_topic
    );

    start_health_liveness_server(&config, context.liveness.clone());

    let worker = ConsumerLoop {
        consumer,
        processor: context.processor,
        liveness: context.worker_liveness,
        batch_size: config.consumer.kafka_consumer_batch_size,
        batch_timeout: Duration::from_millis(config.consumer.kafka_consumer_batch_timeout_ms),
    };

    tokio::select! {
        res = run(worker) => res?,
        _ = shutdown() => info!("Shutting down gracefully..."),
    }

    Ok(())
}
