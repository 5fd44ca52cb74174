// =============================================================================
// AppError — crate-wide error taxonomy
// =============================================================================
//
// One variant per error kind named in the error-handling design: validation,
// authentication, authorization, not-found, conflict, external-service,
// market-data-unavailable, rate-limit, database. Each maps deterministically
// to an HTTP status and a JSON envelope at the axum boundary so handlers
// never hand-roll a status code.
//
// Within workers (Monitor, Notifier) these are mostly constructed and logged
// rather than propagated — per-item failures never abort a batch.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        details: serde_json::Value,
    },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("{resource} not found: {identifier}")]
    NotFound { resource: String, identifier: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("database error: {0}")]
    Database(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn not_found(resource: impl Into<String>, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.into(),
            identifier: identifier.to_string(),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::Authorization(_) => "AUTHORIZATION_ERROR",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::MarketDataUnavailable(_) => "MARKET_DATA_UNAVAILABLE",
            AppError::RateLimit(_) => "RATE_LIMIT_EXCEEDED",
            AppError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            AppError::MarketDataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            AppError::Validation { details, .. } => details.clone(),
            AppError::NotFound {
                resource,
                identifier,
            } => json!({ "resource": resource, "identifier": identifier }),
            AppError::ExternalService { service, .. } => json!({ "service": service }),
            _ => json!({}),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "details": self.details(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = AppError::not_found("Position", "abc-123");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn market_data_unavailable_maps_to_503() {
        let err = AppError::MarketDataUnavailable("no fresh quote".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let err = AppError::RateLimit("channel provider throttled".into());
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
