use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fixity_core::FixityError;
use fixity_model::ModelError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::BatchTooLarge { .. } => {
                Self::payload_too_large(err.to_string())
            }
            _ => Self::bad_request(err.to_string()),
        }
    }
}

impl From<FixityError> for AppError {
    fn from(err: FixityError) -> Self {
        match err {
            FixityError::BufferFull { .. } => {
                tracing::warn!(error = %err, "ingest rejected: buffer full");
                Self::service_unavailable(err.to_string())
            }
            FixityError::Validation(inner) => inner.into(),
            FixityError::InvalidInput(msg) => Self::bad_request(msg),
            FixityError::NotFound(msg) => Self::not_found(msg),
            FixityError::Database(inner) => inner.into(),
            other => {
                tracing::error!(error = ?other, "request failed");
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = ?err, "database operation failed");
        Self::internal("Database operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixity_model::RecordIssue;

    #[test]
    fn domain_errors_map_to_statuses() {
        let full: AppError = FixityError::BufferFull {
            pending: 10,
            incoming: 5,
            max: 12,
        }
        .into();
        assert_eq!(full.status, StatusCode::SERVICE_UNAVAILABLE);

        let too_many: AppError =
            FixityError::Validation(ModelError::BatchTooLarge { len: 9, max: 3 })
                .into();
        assert_eq!(too_many.status, StatusCode::PAYLOAD_TOO_LARGE);

        let invalid: AppError = FixityError::Validation(ModelError::InvalidRecord {
            index: 2,
            issue: RecordIssue::InvalidSha256,
        })
        .into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert!(invalid.message.contains("record 2"));

        let storage: AppError =
            FixityError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
