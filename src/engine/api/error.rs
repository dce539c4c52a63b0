use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, warn};

use super::types::upload_example;
use crate::engine::store::{KeyError, StoreError};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] KeyError),

    #[error("Unsupported platform {arch}/{os}")]
    UnsupportedPlatform { arch: String, os: String },

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Store failure: {0}")]
    Store(StoreError),

    #[error("Failed to create binary patch: {0}")]
    DiffFailed(String),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { path } => ApiError::ArtifactNotFound(path),
            StoreError::InvalidKey(e) => ApiError::InvalidRequest(e),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details, example) = match &self {
            ApiError::MissingParameter(field) => {
                warn!("Request without '{}'", field);
                (
                    StatusCode::BAD_REQUEST,
                    "missing_parameter",
                    format!("Missing query parameter '{}'", field),
                    None,
                    None,
                )
            }
            ApiError::InvalidRequest(e) => {
                warn!("Invalid request: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "Invalid name or version".to_string(),
                    Some(e.to_string()),
                    None,
                )
            }
            ApiError::UnsupportedPlatform { arch, os } => {
                warn!("Unsupported platform: {}/{}", arch, os);
                (
                    StatusCode::BAD_REQUEST,
                    "unsupported_platform",
                    "Unsupported architecture and OS combination".to_string(),
                    Some(format!("'{}/{}' is not served here", arch, os)),
                    None,
                )
            }
            ApiError::ArtifactNotFound(path) => {
                error!("Artifact missing from store: {}", path.display());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "artifact_not_found",
                    "Stored artifact is missing".to_string(),
                    None,
                    None,
                )
            }
            ApiError::Store(e) => {
                error!("Store failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_failure",
                    "Failed to read from the artifact store".to_string(),
                    None,
                    None,
                )
            }
            ApiError::DiffFailed(e) => {
                error!("Failed to create binary patch: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "diff_failed",
                    "Failed to create binary patch".to_string(),
                    None,
                    None,
                )
            }
            ApiError::UploadRejected(reason) => {
                warn!("Upload rejected: {}", reason);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "upload_rejected",
                    reason.clone(),
                    None,
                    Some(upload_example()),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_code.to_owned(),
                message,
                details,
                example,
            }),
        )
            .into_response()
    }
}
