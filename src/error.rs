use crate::db::StoreError;
use crate::orchestration::IngestError;
use crate::pagination::FetchError;
use crate::stats::StatsError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Upstream fetch failed: {0}")]
    Upstream(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidPageSize => AppError::BadRequest(err.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<StatsError> for AppError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::Fetch(e) => e.into(),
            StatsError::Store(e) => e.into(),
            StatsError::NotFound(id) => AppError::NotFound(format!("entity {}", id)),
            e @ (StatsError::Unsupported(_)
            | StatsError::InvalidRange { .. }
            | StatsError::TooManyPoints(_)
            | StatsError::TimestampOutOfRange(_)) => AppError::BadRequest(e.to_string()),
            e @ StatsError::Arithmetic(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockTime, EntityKind};

    #[test]
    fn test_stats_errors_map_to_status() {
        let cases = [
            (
                AppError::from(StatsError::InvalidRange {
                    from: BlockTime::new(2),
                    to: BlockTime::new(1),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(StatsError::Unsupported(EntityKind::Account)),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::from(StatsError::Fetch(FetchError::TimedOut {
                    offset: 0,
                    attempts: 3,
                })),
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::from(FetchError::MissingCount),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
