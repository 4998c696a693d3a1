//! Error handling for the stream monitor

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ApiResponse;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found (stream unit, recording file)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration value (out-of-range values are clamped, not
    /// rejected; this covers values that cannot be corrected, e.g. NaN)
    #[error("Config error: {0}")]
    Config(String),

    /// Recording requested with no stream units configured
    #[error("No stream sources configured")]
    NoSourcesConfigured,

    /// Encoder process never reached a running state
    #[error("Encoder failed to start: {0}")]
    FailedToStart(String),

    /// Encoder process died while a recording was in progress
    #[error("Encoder crashed during recording: {0}")]
    CrashedDuringRecording(String),

    /// Encoder ignored the quit request past the stop timeout
    #[error("Encoder stop timed out: {0}")]
    StopTimeout(String),

    /// Recording output missing or below the minimum valid size
    #[error("Output file empty or invalid: {0}")]
    EmptyOrInvalidOutput(String),

    /// Persisted event log could not be read
    #[error("Event log read failed: {0}")]
    LogRead(String),

    /// Persisted event log could not be written
    #[error("Event log write failed: {0}")]
    LogWrite(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Config(msg) => (StatusCode::BAD_REQUEST, "CONFIG_ERROR", msg.clone()),
            Error::NoSourcesConfigured => (
                StatusCode::CONFLICT,
                "NO_SOURCES_CONFIGURED",
                self.to_string(),
            ),
            Error::FailedToStart(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "FAILED_TO_START",
                msg.clone(),
            ),
            Error::CrashedDuringRecording(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CRASHED_DURING_RECORDING",
                msg.clone(),
            ),
            Error::StopTimeout(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STOP_TIMEOUT",
                msg.clone(),
            ),
            Error::EmptyOrInvalidOutput(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EMPTY_OR_INVALID_OUTPUT",
                msg.clone(),
            ),
            Error::LogRead(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "LOG_READ_FAILURE",
                msg.clone(),
            ),
            Error::LogWrite(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "LOG_WRITE_FAILURE",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(ApiResponse::<serde_json::Value>::error(format!(
            "{}: {}",
            error_code, message
        )));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_responses_use_envelope() {
        let response = Error::NoSourcesConfigured.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let v = body_json(response).await;
        assert_eq!(v["ok"], false);
        assert!(v.get("data").is_none());
        let msg = v["error"].as_str().unwrap();
        assert!(msg.starts_with("NO_SOURCES_CONFIGURED:"), "{}", msg);
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let response = Error::NotFound("stream 42".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let v = body_json(response).await;
        assert!(v["error"].as_str().unwrap().contains("stream 42"));
    }
}
