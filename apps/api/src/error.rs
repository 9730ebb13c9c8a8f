//! # API Error Types
//!
//! Services fail with [`ServiceError`], a thin union of the crate errors.
//! The HTTP edge turns every failure into one [`ApiError`] shape.
//!
//! ## Status Mapping
//! ```text
//! ┌──────────────────────┬────────┬─────────────────────────────────────────┐
//! │ ErrorKind            │ Status │ Examples                                │
//! ├──────────────────────┼────────┼─────────────────────────────────────────┤
//! │ validation           │  400   │ empty items, bad phone, bad callback    │
//! │ unauthenticated      │  401   │ missing / expired bearer token          │
//! │ authorization        │  403   │ buyer confirming an order               │
//! │ not_found            │  404   │ unknown order / transaction             │
//! │ conflict             │  409   │ sold out, invalid transition, refunds   │
//! │ upstream_gateway     │  502   │ gateway rejected or garbled a request   │
//! │                      │  503   │ gateway timeout / unreachable (retry)   │
//! │ internal             │  500   │ database failures (details logged only) │
//! └──────────────────────┴────────┴─────────────────────────────────────────┘
//! ```
//!
//! ## Response Body
//! ```json
//! { "error": { "kind": "conflict", "code": "PRODUCT_UNAVAILABLE",
//!              "message": "Product p1 is unavailable: only 2 kg left" } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use doko_core::{CoreError, ErrorKind, ValidationError};
use doko_db::DbError;
use doko_gateway::GatewayError;

// =============================================================================
// Service Errors
// =============================================================================

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),

    /// The payment gateway failed or refused. The transaction, if any, is
    /// left open.
    #[error("Upstream gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Core(CoreError::Validation(err))
    }
}

// =============================================================================
// HTTP Error
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// The error body every endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, code: &str, message: impl Into<String>) -> Self {
        ApiError {
            status: status_for(kind),
            kind,
            code: code.to_string(),
            message: message.into(),
            fields: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        ApiError::new(ErrorKind::Unauthenticated, "UNAUTHENTICATED", message)
    }

    /// A 500 whose details stay in the log.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "Internal error");
        ApiError::new(ErrorKind::Internal, "INTERNAL_ERROR", "Internal server error")
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::UpstreamGateway => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let mut api = ApiError::new(err.kind(), err.code(), err.to_string());
        if let CoreError::Validation(validation) = &err {
            api.fields = Some(vec![FieldError {
                field: validation.field().to_string(),
                message: validation.to_string(),
            }]);
        }
        api
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(err).into()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::NotFound { .. } => ApiError::new(ErrorKind::NotFound, "NOT_FOUND", err.to_string()),
            DbError::StockConflict { product_id } => {
                CoreError::unavailable(product_id.clone(), "insufficient stock").into()
            }
            DbError::StaleState { .. } | DbError::UniqueViolation { .. } => {
                ApiError::new(ErrorKind::Conflict, "CONFLICT", err.to_string())
            }
            _ => ApiError::internal(&err),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        if err.is_callback_error() {
            return ApiError::new(ErrorKind::Validation, "INVALID_CALLBACK", err.to_string());
        }
        match &err {
            GatewayError::NotConfigured(method) => ApiError::new(
                ErrorKind::Validation,
                "PAYMENT_METHOD_UNAVAILABLE",
                format!("{} payments are not enabled", method),
            ),
            GatewayError::InvalidConfig(_) => ApiError::internal(&err),
            _ => {
                let mut api = ApiError::new(
                    ErrorKind::UpstreamGateway,
                    "UPSTREAM_GATEWAY_ERROR",
                    err.to_string(),
                );
                if err.is_retryable() {
                    api.status = StatusCode::SERVICE_UNAVAILABLE;
                }
                api
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Core(e) => e.into(),
            ServiceError::Db(e) => e.into(),
            ServiceError::Gateway(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(serde_json::json!({ "error": self }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doko_core::{Money, PaymentMethod};
    use std::time::Duration;

    #[test]
    fn test_core_error_status() {
        let err: ApiError = CoreError::RefundExceedsBalance {
            requested: Money::from_rupees(600),
            remaining: Money::from_rupees(550),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "REFUND_EXCEEDS_BALANCE");

        let err: ApiError = CoreError::not_authorized("buyer only").into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validation_lists_field() {
        let err: ApiError = ValidationError::Required {
            field: "items".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let fields = err.fields.unwrap();
        assert_eq!(fields[0].field, "items");
    }

    #[test]
    fn test_gateway_status() {
        let timeout: ApiError = GatewayError::Timeout {
            gateway: "khalti",
            after: Duration::from_secs(15),
        }
        .into();
        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.kind, ErrorKind::UpstreamGateway);

        let rejected: ApiError = GatewayError::Rejected {
            gateway: "khalti",
            status: 401,
            message: "Invalid token.".into(),
        }
        .into();
        assert_eq!(rejected.status, StatusCode::BAD_GATEWAY);

        let forged: ApiError = GatewayError::SignatureMismatch.into();
        assert_eq!(forged.status, StatusCode::BAD_REQUEST);

        let off: ApiError = GatewayError::NotConfigured(PaymentMethod::Esewa).into();
        assert_eq!(off.code, "PAYMENT_METHOD_UNAVAILABLE");
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err: ApiError = DbError::QueryFailed("no such table: orders".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("orders"));

        let body = serde_json::to_value(&err).unwrap();
        assert!(body.get("status").is_none());
        assert_eq!(body["kind"], "internal");
    }
}
