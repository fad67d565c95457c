use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

use crate::redis::CustomRedisError;

/// Error body, shaped like the Django REST Framework errors our admin UI
/// already knows how to render.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub detail: String,
}

#[derive(Error, Debug)]
pub enum FlagError {
    #[error("Unknown flag: {0}")]
    UnknownFlag(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("Invalid rollout percentage {0}, expected 0-100")]
    InvalidRolloutPercentage(u32),
    #[error("failed to parse stored data")]
    DataParsingError,
    #[error("failed to serialize data: {0}")]
    SerializationError(String),
    #[error("redis unavailable")]
    RedisUnavailable,
    #[error("Timed out while talking to redis")]
    TimeoutError,
    #[error("failed to write to redis: {0}")]
    StoreWriteFailed(CustomRedisError),
}

impl FlagError {
    /// Returns (error_code, status_code) for this error.
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            FlagError::UnknownFlag(_) => ("unknown_flag", StatusCode::NOT_FOUND),
            FlagError::BadRequest(_) => ("bad_request", StatusCode::BAD_REQUEST),
            FlagError::RequestParsingError(_) => ("request_parsing_error", StatusCode::BAD_REQUEST),
            FlagError::InvalidRolloutPercentage(_) => {
                ("invalid_rollout_percentage", StatusCode::BAD_REQUEST)
            }
            FlagError::DataParsingError => ("data_parsing_error", StatusCode::INTERNAL_SERVER_ERROR),
            FlagError::SerializationError(_) => {
                ("serialization_error", StatusCode::INTERNAL_SERVER_ERROR)
            }
            FlagError::StoreWriteFailed(_) => {
                ("store_write_failed", StatusCode::INTERNAL_SERVER_ERROR)
            }
            FlagError::RedisUnavailable => ("redis_unavailable", StatusCode::SERVICE_UNAVAILABLE),
            FlagError::TimeoutError => ("timeout", StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    /// Returns a short error code for logging and the response body.
    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }

    pub fn is_5xx(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Maps a failed redis read. NotFound is handled by callers before this.
    pub fn from_redis_read(err: CustomRedisError) -> Self {
        match err {
            CustomRedisError::Timeout => FlagError::TimeoutError,
            _ => FlagError::RedisUnavailable,
        }
    }
}

impl From<CustomRedisError> for FlagError {
    fn from(err: CustomRedisError) -> Self {
        FlagError::StoreWriteFailed(err)
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_5xx() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }

        let error_type = if self.is_5xx() {
            "server_error"
        } else {
            "validation_error"
        };

        let body = ErrorResponse {
            error_type: error_type.to_string(),
            code: self.error_code().to_string(),
            detail: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_not_5xx() {
        assert!(!FlagError::UnknownFlag("nope".to_string()).is_5xx());
        assert!(!FlagError::InvalidRolloutPercentage(101).is_5xx());
        assert_eq!(
            FlagError::UnknownFlag("nope".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_failures_are_5xx() {
        assert!(FlagError::StoreWriteFailed(CustomRedisError::Timeout).is_5xx());
        assert!(FlagError::RedisUnavailable.is_5xx());
        assert_eq!(
            FlagError::from_redis_read(CustomRedisError::Timeout).error_code(),
            "timeout"
        );
        assert_eq!(
            FlagError::from_redis_read(CustomRedisError::NotFound).error_code(),
            "redis_unavailable"
        );
    }
}
