use std::future::ready;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use health::HealthRegistry;
use sensor_common::metrics::setup_metrics_routes;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ingest_endpoint;
use crate::publisher::BatchPublisher;

pub const BATCH_BODY_SIZE: usize = 20_000_000; // 20MB, readings are small

#[derive(Clone)]
pub struct State {
    pub publisher: BatchPublisher,
}

async fn index() -> &'static str {
    "sensor capture"
}

pub fn router(publisher: BatchPublisher, liveness: HealthRegistry, metrics: bool) -> Router {
    let state = State { publisher };

    // Sensors and dashboards post from anywhere
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/api/sensor-data", post(ingest_endpoint::ingest))
        .route("/api/sensor-data/", post(ingest_endpoint::ingest))
        .layer(DefaultBodyLimit::max(BATCH_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when used as a library (during tests etc)
    // does not work well.
    if metrics {
        setup_metrics_routes(router)
    } else {
        router
    }
}
