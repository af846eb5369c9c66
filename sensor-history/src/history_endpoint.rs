use std::str::FromStr;

use axum::extract::{Query, State};
use sensor_common::store::{HistoryQuery, StoreError};
use sensor_common::time::format_timestamp;
use serde::Deserialize;
use time::Duration;
use tracing::{error, instrument};

use crate::api::{HistoryError, HistoryFilters, HistoryResponse};
use crate::router;

pub const DEFAULT_HOURS: u32 = 24;
pub const DEFAULT_LIMIT: usize = 100;

/// Raw query string, numbers are parsed by hand so that bad input gets a
/// JSON error body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub sensor_type: Option<String>,
    pub sensor_id: Option<String>,
    pub hours: Option<String>,
    pub limit: Option<String>,
}

#[instrument(skip_all, fields(sensor_type, sensor_id, hours, limit))]
pub async fn history(
    state: State<router::State>,
    params: Query<HistoryParams>,
) -> Result<HistoryResponse, HistoryError> {
    let params = params.0;
    let hours: u32 = parse_positive("hours", params.hours.as_deref(), DEFAULT_HOURS)?;
    let limit: usize = parse_positive("limit", params.limit.as_deref(), DEFAULT_LIMIT)?;
    let limit = limit.min(state.max_limit);

    let span = tracing::Span::current();
    span.record("hours", hours);
    span.record("limit", limit);

    // An empty filter means no filter
    let sensor_type = params.sensor_type.filter(|value| !value.is_empty());
    let sensor_id = params.sensor_id.filter(|value| !value.is_empty());
    if let Some(sensor_type) = &sensor_type {
        span.record("sensor_type", sensor_type.as_str());
    }
    if let Some(sensor_id) = &sensor_id {
        span.record("sensor_id", sensor_id.as_str());
    }

    let query = HistoryQuery {
        sensor_type: sensor_type.clone(),
        sensor_id: sensor_id.clone(),
        since: cutoff(&state, hours),
        limit,
    };

    let timeout = state.store_timeout;
    let data = match tokio::time::timeout(timeout, state.store.query(&query)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
    .map_err(|err| {
        error!("failed to query readings: {}", err);
        HistoryError::Store(err)
    })?;

    Ok(HistoryResponse {
        status: "success",
        count: data.len(),
        filters: HistoryFilters {
            sensor_type,
            sensor_id,
            hours,
            limit,
        },
        data,
    })
}

fn parse_positive<T>(name: &'static str, raw: Option<&str>, default: T) -> Result<T, HistoryError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(HistoryError::InvalidParameter {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Oldest timestamp to return. A window reaching past the earliest
/// representable date returns everything.
fn cutoff(state: &router::State, hours: u32) -> String {
    let now = state.timesource.now();
    match now.checked_sub(Duration::hours(i64::from(hours))) {
        Some(since) => format_timestamp(since),
        None => String::new(),
    }
}
