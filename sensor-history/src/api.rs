use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sensor_common::reading::SensorReading;
use sensor_common::store::StoreError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilters {
    pub sensor_type: Option<String>,
    pub sensor_id: Option<String>,
    pub hours: u32,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub status: &'static str,
    pub count: usize,
    pub filters: HistoryFilters,
    pub data: Vec<SensorReading>,
}

impl IntoResponse for HistoryResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("invalid {name} parameter: {value:?}, expected a positive integer")]
    InvalidParameter { name: &'static str, value: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for HistoryError {
    fn into_response(self) -> Response {
        let status = match self {
            HistoryError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            HistoryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
