use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use health::HealthRegistry;
use sensor_common::metrics::setup_metrics_routes;
use sensor_common::store::ReadingStore;
use sensor_common::time::TimeSource;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::history_endpoint;

#[derive(Clone)]
pub struct State {
    pub store: Arc<dyn ReadingStore + Send + Sync>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
    pub max_limit: usize,
    pub store_timeout: Duration,
}

async fn index() -> &'static str {
    "sensor history"
}

pub fn router(state: State, liveness: HealthRegistry, metrics: bool) -> Router {
    // Read-only data, any dashboard may query it
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/api/sensor-history", get(history_endpoint::history))
        .route("/api/sensor-history/", get(history_endpoint::history))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    if metrics {
        setup_metrics_routes(router)
    } else {
        router
    }
}
