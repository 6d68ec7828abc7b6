//! Platform-independent error taxonomy. Every fallible operation below the
//! HTTP layer reports one of these kinds; the HTTP layer maps kinds to status
//! codes and stable string constants.

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, fields: Vec<String> },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    Auth { message: String },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("external service failure: {message}")]
    External { message: String },

    #[error("internal error ({correlation_id})")]
    Internal {
        correlation_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>, fields: Vec<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound { what: what.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict_with(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn internal(source: anyhow::Error) -> Self {
        AppError::Internal {
            correlation_id: Uuid::new_v4(),
            source,
        }
    }

    /// Stable machine-readable code for logs and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Conflict { code, .. } => code,
            AppError::Auth { .. } => "UNAUTHORIZED",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::External { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::not_found("row"),
            _ => AppError::internal(err.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            AppError::validation("bad", vec!["metacritic_score".into()]).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(AppError::not_found("library").code(), "NOT_FOUND");
        assert_eq!(
            AppError::conflict("SYNC_ALREADY_IN_PROGRESS", "busy").code(),
            "SYNC_ALREADY_IN_PROGRESS"
        );
    }
}
