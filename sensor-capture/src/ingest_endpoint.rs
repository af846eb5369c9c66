use axum::extract::State;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::Value;
use tracing::{error, instrument, warn, Span};

use crate::api::{IngestError, IngestResponse};
use crate::router;

/// Accepts one reading object or an array of them. Readings that fail
/// validation do not fail the request, they are set aside by the publisher.
#[instrument(skip_all, fields(content_type, readings))]
pub async fn ingest(
    state: State<router::State>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    if let Some(content_type) = headers.get("content-type") {
        Span::current().record("content_type", format!("{:?}", content_type));
    }

    let readings = parse_body(&body).map_err(|err| {
        warn!("rejected request body: {}", err);
        err
    })?;
    Span::current().record("readings", readings.len());

    let processed = state.publisher.publish(readings).await.map_err(|err| {
        error!("failed to publish readings: {}", err);
        err
    })?;

    Ok(IngestResponse::processed(processed))
}

pub fn parse_body(body: &[u8]) -> Result<Vec<Value>, IngestError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| IngestError::RequestDecodingError(format!("invalid UTF-8: {e}")))?;

    match serde_json::from_str(text)? {
        Value::Array(readings) => Ok(readings),
        reading => Ok(vec![reading]),
    }
}
