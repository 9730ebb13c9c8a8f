//! # Gateway Error Types
//!
//! Failures talking to, or hearing back from, a payment provider.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Gateway Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │   Upstream      │  │     Callback            │ │
//! │  │  (retryable)    │  │                 │  │                         │ │
//! │  │  Timeout        │  │  Rejected       │  │  InvalidCallback        │ │
//! │  │  Unavailable    │  │  Malformed-     │  │  SignatureMismatch      │ │
//! │  │                 │  │  Response       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐                                                    │
//! │  │  Configuration  │   InvalidConfig, NotConfigured                     │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A transport error never means the payment failed. The transaction stays
//! open and the next verify (or the reconciler) asks again.

use doko_core::signature::SignatureError;
use doko_core::PaymentMethod;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The provider did not answer within the configured timeout.
    #[error("{gateway} did not respond within {after:?}")]
    Timeout {
        gateway: &'static str,
        after: Duration,
    },

    /// Connection refused, DNS failure, or a 5xx from the provider.
    #[error("{gateway} is unavailable: {message}")]
    Unavailable {
        gateway: &'static str,
        message: String,
    },

    // =========================================================================
    // Upstream Errors
    // =========================================================================
    /// The provider answered with something we could not parse.
    #[error("Malformed response from {gateway}: {message}")]
    MalformedResponse {
        gateway: &'static str,
        message: String,
    },

    /// The provider refused the request (4xx).
    #[error("{gateway} rejected the request ({status}): {message}")]
    Rejected {
        gateway: &'static str,
        status: u16,
        message: String,
    },

    // =========================================================================
    // Callback Errors
    // =========================================================================
    /// Callback data is missing fields or does not match the transaction.
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// Callback signature did not verify against the merchant secret.
    #[error("Callback signature does not match")]
    SignatureMismatch,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// No adapter registered for this payment method.
    #[error("No gateway configured for {0}")]
    NotConfigured(PaymentMethod),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl GatewayError {
    /// Classifies a reqwest failure for `gateway`.
    pub(crate) fn from_http(gateway: &'static str, after: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout { gateway, after }
        } else if err.is_decode() {
            GatewayError::MalformedResponse {
                gateway,
                message: err.to_string(),
            }
        } else {
            GatewayError::Unavailable {
                gateway,
                message: err.to_string(),
            }
        }
    }
}

impl From<SignatureError> for GatewayError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::EmptySecret => GatewayError::InvalidConfig(err.to_string()),
            SignatureError::MalformedSignature => GatewayError::SignatureMismatch,
            SignatureError::MissingField(_) => GatewayError::InvalidCallback(err.to_string()),
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidConfig(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl GatewayError {
    /// Returns true if asking again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout { .. } | GatewayError::Unavailable { .. }
        )
    }

    /// Returns true if the caller sent us bad callback data.
    pub fn is_callback_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidCallback(_) | GatewayError::SignatureMismatch
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidConfig(_) | GatewayError::NotConfigured(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::Timeout {
            gateway: "esewa",
            after: Duration::from_secs(10)
        }
        .is_retryable());
        assert!(GatewayError::Unavailable {
            gateway: "khalti",
            message: "connection refused".into()
        }
        .is_retryable());

        assert!(!GatewayError::SignatureMismatch.is_retryable());
        assert!(!GatewayError::Rejected {
            gateway: "khalti",
            status: 401,
            message: "Invalid token".into()
        }
        .is_retryable());
        assert!(!GatewayError::NotConfigured(PaymentMethod::Khalti).is_retryable());
    }

    #[test]
    fn test_signature_error_mapping() {
        assert!(GatewayError::from(SignatureError::MalformedSignature).is_callback_error());
        assert!(GatewayError::from(SignatureError::MissingField("status".into()))
            .is_callback_error());
        assert!(GatewayError::from(SignatureError::EmptySecret).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::Timeout {
            gateway: "esewa",
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "esewa did not respond within 10s");
    }
}
