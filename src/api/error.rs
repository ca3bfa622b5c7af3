use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use super::validation::RequestValidationError;
use crate::error::OrchestratorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    CapacityExceeded(String),
    #[error("{0}")]
    MetadataFetchFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::MetadataFetchFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            ApiError::MetadataFetchFailed(_) => "METADATA_FETCH_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<RequestValidationError> for ApiError {
    fn from(value: RequestValidationError) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        match value {
            OrchestratorError::InvalidRequest(message) => ApiError::InvalidPayload(message),
            OrchestratorError::JobNotFound(id) => ApiError::NotFound(format!("job {}", id)),
            err @ OrchestratorError::CapacityExceeded { .. } => {
                ApiError::CapacityExceeded(err.to_string())
            }
            err @ OrchestratorError::MetadataFetchFailed(_) => {
                ApiError::MetadataFetchFailed(err.to_string())
            }
            err => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobId;

    #[test]
    fn test_orchestrator_errors_map_to_codes() {
        let err = ApiError::from(OrchestratorError::CapacityExceeded { active: 3, limit: 3 });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");

        let err = ApiError::from(OrchestratorError::JobNotFound(JobId::new()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ApiError::from(OrchestratorError::MetadataFetchFailed("Private video".into()));
        assert_eq!(err.code(), "METADATA_FETCH_FAILED");
        assert!(err.to_string().contains("Private video"));

        let err = ApiError::from(OrchestratorError::InvalidRequest("url is empty".into()));
        assert_eq!(err.code(), "INVALID_PAYLOAD");
    }
}
