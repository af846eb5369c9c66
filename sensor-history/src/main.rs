use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use health::{ComponentStatus, HealthHandle};
use sensor_common::store::PgReadingStore;
use sensor_common::time::SystemTime;
use sensor_history::config::Config;
use sensor_history::router::{router, State};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

/// The service is live as long as the database answers.
async fn report_store_health(store: PgReadingStore, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        match store.ping().await {
            Ok(()) => liveness.report_healthy(),
            Err(err) => {
                warn!("database ping failed: {}", err);
                liveness.report_status(ComponentStatus::Unhealthy);
            }
        }
    }
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

    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;
    let store_timeout = Duration::from_millis(config.store_timeout_ms);
    let store = PgReadingStore::new(
        &config.database_url,
        config.max_pg_connections,
        store_timeout,
    )
    .await?;

    let liveness = health::HealthRegistry::new("liveness");
    let store_liveness = liveness.register("postgres", time::Duration::seconds(30));
    tokio::spawn(report_store_health(store.clone(), store_liveness));

    let state = State {
        store: Arc::new(store),
        timesource: Arc::new(SystemTime {}),
        max_limit: config.max_limit,
        store_timeout,
    };
    let app = router(state, liveness, true);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("listening on {}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}
