use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_eq;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use health::HealthRegistry;
use http_body_util::BodyExt;
use sensor_common::reading::SensorReading;
use sensor_common::store::ReadingStore;
use sensor_common::test_utils::{FixedTime, MemoryReadingStore};
use sensor_history::router::{router, State};
use serde_json::{json, Value};
use tower::ServiceExt;

const NOW: &str = "2024-03-02T12:00:00.000000Z";

fn reading(id: &str, sensor_id: &str, sensor_type: &str, timestamp: &str) -> SensorReading {
    serde_json::from_value(json!({
        "id": id,
        "sensorId": sensor_id,
        "sensorType": sensor_type,
        "value": 1.5,
        "unit": "u",
        "timestamp": timestamp
    }))
    .expect("invalid reading")
}

async fn setup(max_limit: usize) -> (Router, MemoryReadingStore) {
    let store = MemoryReadingStore::new();
    for reading in [
        reading("r1", "s1", "temperature", "2024-03-02T11:00:00.000000Z"),
        reading("r2", "s2", "humidity", "2024-03-02T10:00:00.000000Z"),
        reading("r3", "s1", "temperature", "2024-03-02T09:00:00.000000Z"),
        reading("r4", "s1", "temperature", "2024-02-20T09:00:00.000000Z"),
    ] {
        store.upsert(&reading).await.expect("failed to seed store");
    }

    let state = State {
        store: Arc::new(store.clone()),
        timesource: Arc::new(FixedTime {
            time: NOW.to_string(),
        }),
        max_limit,
        store_timeout: Duration::from_secs(1),
    };
    (router(state, HealthRegistry::new("dummy"), false), store)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("Origin", "http://dashboard.local")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    let status = response.status();
    let allow_origin = response
        .headers()
        .get("access-control-allow-origin")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    let body = serde_json::from_slice(&body).expect("response is not JSON");
    (status, allow_origin, body)
}

fn ids(body: &Value) -> Vec<&str> {
    body["data"]
        .as_array()
        .expect("data should be an array")
        .iter()
        .filter_map(|reading| reading["id"].as_str())
        .collect()
}

#[tokio::test]
async fn defaults_to_last_day() {
    let (router, _) = setup(1000).await;

    let (status, allow_origin, body) = get(router, "/api/sensor-history").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(allow_origin.as_deref(), Some("*"));
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["count"], json!(3));
    assert_json_eq!(
        body["filters"],
        json!({"sensorType": null, "sensorId": null, "hours": 24, "limit": 100})
    );
    assert_eq!(ids(&body), vec!["r1", "r2", "r3"]);
    assert_json_eq!(
        body["data"][0],
        json!({
            "id": "r1",
            "sensorId": "s1",
            "sensorType": "temperature",
            "value": 1.5,
            "unit": "u",
            "timestamp": "2024-03-02T11:00:00.000000Z"
        })
    );
}

#[tokio::test]
async fn filters_and_limits() {
    let (router, _) = setup(1000).await;

    let (status, _, body) = get(
        router,
        "/api/sensor-history?sensorType=temperature&sensorId=s1&hours=720&limit=2",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec!["r1", "r3"]);
    assert_json_eq!(
        body["filters"],
        json!({"sensorType": "temperature", "sensorId": "s1", "hours": 720, "limit": 2})
    );
}

#[tokio::test]
async fn limit_is_capped() {
    let (router, _) = setup(1).await;

    let (status, _, body) = get(router, "/api/sensor-history?limit=500").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["filters"]["limit"], json!(1));
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    for uri in [
        "/api/sensor-history?hours=abc",
        "/api/sensor-history?hours=0",
        "/api/sensor-history?limit=-5",
    ] {
        let (router, _) = setup(1000).await;
        let (status, _, body) = get(router, uri).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "for {uri}");
        assert!(body["error"].is_string(), "for {uri}");
    }
}

#[tokio::test]
async fn store_failure_is_internal_error() {
    let (router, store) = setup(1000).await;
    store.set_failing(true);

    let (status, allow_origin, body) = get(router, "/api/sensor-history").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(allow_origin.as_deref(), Some("*"));
    assert_json_eq!(body, json!({"error": "store unavailable: store set to fail"}));
}

#[tokio::test]
async fn returns_readings_with_free_form_locations() {
    let (router, store) = setup(1000).await;
    let reading: SensorReading = serde_json::from_value(json!({
        "id": "r5",
        "sensorId": "s9",
        "sensorType": "temperature",
        "value": 40,
        "unit": "°C",
        "timestamp": "2024-03-02T11:30:00.000000Z",
        "location": "kitchen"
    }))
    .expect("invalid reading");
    store.upsert(&reading).await.expect("failed to seed store");

    let (status, _, body) = get(router, "/api/sensor-history?sensorId=s9").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["data"][0]["location"], json!("kitchen"));
    assert_eq!(body["data"][0]["value"], json!(40));
}
