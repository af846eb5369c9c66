use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

pub const READINGS_RECEIVED_TOTAL: &str = "sensor_readings_received_total";
pub const READINGS_PUBLISHED_TOTAL: &str = "sensor_readings_published_total";
pub const READINGS_DROPPED_TOTAL: &str = "sensor_readings_dropped_total";
pub const READINGS_PERSISTED_TOTAL: &str = "sensor_readings_persisted_total";
pub const DEAD_LETTERED_TOTAL: &str = "sensor_readings_dead_lettered_total";
pub const DEAD_LETTER_FAILURES_TOTAL: &str = "sensor_dead_letter_failures_total";
pub const PUBLISH_BATCH_SIZE: &str = "sensor_publish_batch_size";
pub const CONSUME_BATCH_SIZE: &str = "sensor_consume_batch_size";

const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const HTTP_REQUESTS_DURATION_SECONDS: &str = "http_requests_duration_seconds";

pub fn report_dropped_readings(cause: &'static str, quantity: u64) {
    counter!(READINGS_DROPPED_TOTAL, "cause" => cause).increment(quantity);
}

/// Bind a listener on `bind` and serve `router` until the process exits.
/// Used for the side HTTP server of services without their own API.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    const BATCH_SIZES: &[f64] = &[
        1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUESTS_DURATION_SECONDS.to_string()),
            EXPONENTIAL_SECONDS,
        )
        .expect("invalid duration buckets")
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)
        .expect("invalid batch size buckets")
        .install_recorder()
        .expect("failed to install metrics recorder")
}

/// Counts requests and records their latency, labelled by method, matched
/// route and status code.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |path| path.as_str().to_owned());

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUESTS_DURATION_SECONDS, &labels).record(start.elapsed().as_secs_f64());

    response
}
