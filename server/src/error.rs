use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use core::error::PipelineError;
use serde::Serialize;

/// Standardized API error response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetails {
                code: code.into(),
                message: message.into(),
                details: Some(details.into()),
            },
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", format!("{} not found", resource.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn database_error(details: impl Into<String>) -> Self {
        Self::with_details("DATABASE_ERROR", "A database error occurred", details)
    }

    pub fn upstream_error(details: impl Into<String>) -> Self {
        Self::with_details("UPSTREAM_ERROR", "An upstream service failed", details)
    }

    pub fn not_configured(service: impl Into<String>) -> Self {
        Self::new("NOT_CONFIGURED", format!("{} is not configured", service.into()))
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new("PRECONDITION_FAILED", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "PRECONDITION_FAILED" => StatusCode::PRECONDITION_FAILED,
            "NOT_CONFIGURED" => StatusCode::SERVICE_UNAVAILABLE,
            "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::not_found("resource"),
            sqlx::Error::Database(db_err) => {
                tracing::error!("database error: {:?}", db_err);
                ApiError::database_error(db_err.message())
            }
            _ => {
                tracing::error!("database error: {:?}", err);
                ApiError::internal_error("database operation failed")
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UpstreamTransient(detail) => ApiError::upstream_error(detail),
            PipelineError::UpstreamMalformed(detail) => ApiError::upstream_error(detail),
            PipelineError::NotConfigured { service } => ApiError::not_configured(service),
            PipelineError::MissingReference(detail) => ApiError::not_found(detail),
            PipelineError::PreconditionViolated(detail) => ApiError::precondition_failed(detail),
            PipelineError::Database(e) => e.into(),
            PipelineError::Other(e) => {
                tracing::error!("internal error: {:?}", e);
                ApiError::internal_error("an unexpected internal error occurred")
            }
        }
    }
}
