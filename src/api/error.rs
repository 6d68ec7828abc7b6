//! HTTP projection of the error taxonomy: status codes plus the unified
//! `{"error": {...}}` body.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug)]
pub struct ApiError(pub AppError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(AppError::internal(err))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError(AppError::from(err))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Auth { .. } => StatusCode::UNAUTHORIZED,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::External { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let trace_id = match &self.0 {
            AppError::Internal { correlation_id, .. } => *correlation_id,
            _ => Uuid::new_v4(),
        };
        if let AppError::Internal { source, .. } = &self.0 {
            error!(%trace_id, error = %source, "internal error surfaced to client");
        }
        let details = match &self.0 {
            AppError::Validation { fields, .. } => json!({ "fields": fields }),
            AppError::Conflict { details, .. } => details.clone().unwrap_or(json!({})),
            AppError::RateLimited {
                retry_after_secs, ..
            } => json!({ "retry_after": retry_after_secs }),
            _ => json!({}),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
                "details": details,
                "timestamp": Utc::now().to_rfc3339(),
                "trace_id": trace_id,
            }
        }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_contract() {
        let cases = [
            (AppError::validation("x", vec![]), StatusCode::BAD_REQUEST),
            (AppError::not_found("library"), StatusCode::NOT_FOUND),
            (
                AppError::conflict("SYNC_ALREADY_IN_PROGRESS", "busy"),
                StatusCode::CONFLICT,
            ),
            (
                AppError::RateLimited {
                    message: "slow down".into(),
                    retry_after_secs: Some(60),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AppError::External {
                    message: "steam 502".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status_code(), status);
        }
    }

    #[test]
    fn body_carries_unified_shape() {
        let err = ApiError(AppError::conflict_with(
            "SYNC_ALREADY_IN_PROGRESS",
            "sync already in progress",
            json!({"operation_id": "abc"}),
        ));
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
