use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use delete_common::queue::QueueError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("partner error: {0}")]
    PartnerError(QueueError),
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self {
            IngestError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            IngestError::PartnerError(_) => StatusCode::SERVICE_UNAVAILABLE,
            IngestError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                code: self.code(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<QueueError> for IngestError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Serialization(error) => IngestError::Unknown(error.to_string()),
            other => IngestError::PartnerError(other),
        }
    }
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidInput(_) => "InvalidInput",
            IngestError::PartnerError(_) => "PartnerError",
            IngestError::Unknown(_) => "Unknown",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

/// What happened to the events of one ingested batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub received: usize,
    pub invalid_device_id: usize,
    pub duplicates: usize,
    pub published: usize,
}
