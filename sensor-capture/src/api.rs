use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
    Error,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
    pub message: String,
    pub processed_count: usize,
}

impl IngestResponse {
    pub fn processed(count: usize) -> Self {
        IngestResponse {
            status: IngestStatus::Success,
            message: format!("Processed {count} sensor readings"),
            processed_count: count,
        }
    }
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: IngestStatus,
    message: &'static str,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),

    #[error("transient error, please retry")]
    RetryableSinkError,
    #[error("maximum message size exceeded")]
    EventTooBig,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // Producers only ever see these two messages, details stay in our logs
        let (status, message) = match self {
            IngestError::RequestDecodingError(_) | IngestError::RequestParsingError(_) => {
                (StatusCode::BAD_REQUEST, "Invalid JSON format")
            }
            IngestError::RetryableSinkError | IngestError::EventTooBig => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (
            status,
            Json(ErrorBody {
                status: IngestStatus::Error,
                message,
            }),
        )
            .into_response()
    }
}
