//! Service error types and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use xreg_storage::StorageError;

/// Result type alias for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Core(#[from] xreg_core::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{method} is not supported on {target}")]
    MethodNotAllowed { method: String, target: String },
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        use xreg_core::Error as Core;

        match self {
            Self::Core(Core::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(Core::EpochConflict { .. }) => StatusCode::CONFLICT,
            Self::Core(Core::Serialization(_) | Core::Internal(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Core(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("Request failed with {}: {}", status, self);
        }
        let body = json!({
            "status": status.as_u16(),
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_core::{Error, LifecycleError};

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ServiceError, StatusCode)> = vec![
            (Error::NotFound("/x".into()).into(), StatusCode::NOT_FOUND),
            (
                Error::EpochConflict {
                    xid: "/x".into(),
                    expected: 1,
                    actual: 2,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                Error::from(LifecycleError::LatestRequired("/x".into())).into(),
                StatusCode::BAD_REQUEST,
            ),
            (Error::Internal("boom".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ServiceError::Storage(StorageError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err);
        }
    }
}
