//! # Error Types
//!
//! Domain-specific error types for doko-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  doko-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  doko-db errors        └── DbError       - Database failures           │
//! │  doko-gateway errors   └── GatewayError  - Payment provider failures   │
//! │                                                                         │
//! │  apps/api              └── ApiError      - What HTTP callers see       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ─┐                                  │
//! │        DbError ─────────────────────┼──► ApiError ──► JSON response    │
//! │        GatewayError ────────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `CoreError` carries a stable [`ErrorKind`] so the HTTP layer never
//! has to guess a status code from a message.

use serde::Serialize;
use thiserror::Error;

use crate::money::Money;
use crate::types::{OrderStatus, TransactionStatus};

// =============================================================================
// Error Kind
// =============================================================================

/// Stable error taxonomy shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing request fields (400).
    Validation,
    /// Referenced entity is absent (404).
    NotFound,
    /// Caller is not authenticated (401).
    Unauthenticated,
    /// Actor lacks the capability for the operation (403).
    Authorization,
    /// Business conflict: stock, state, refund balance (409).
    Conflict,
    /// Payment provider unreachable or returned garbage (502/503).
    UpstreamGateway,
    /// Anything unexpected (500).
    Internal,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A product in the cart is missing, inactive, or understocked.
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (tomatoes × 5)
    ///      │
    ///      ▼
    /// Stock check: available = 3
    ///      │
    ///      ▼
    /// ProductUnavailable { product_id, reason: "only 3 in stock" }
    ///      │
    ///      ▼
    /// UI: "Tomatoes: only 3 in stock"
    /// ```
    #[error("Product {product_id} is unavailable: {reason}")]
    ProductUnavailable { product_id: String, reason: String },

    /// A farmer tried to buy their own listing.
    #[error("Cannot purchase your own listing: {product_id}")]
    SelfPurchase { product_id: String },

    /// Computed subtotal was zero or negative.
    #[error("Order total must be positive, got {subtotal}")]
    InvalidTotal { subtotal: Money },

    /// Requested order status change is not an adjacent forward move.
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Requested transaction status change is not allowed.
    #[error("Cannot move transaction from {from} to {to}")]
    InvalidTransactionTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Actor lacks the capability or relationship for the operation.
    #[error("Not authorized: {reason}")]
    NotAuthorized { reason: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Order already has a completed (or refunded) payment.
    #[error("Order {order_id} is already paid")]
    AlreadyPaid { order_id: String },

    /// Order was cancelled; no further payments or transitions.
    #[error("Order {order_id} is cancelled")]
    OrderCancelled { order_id: String },

    #[error("Order {order_id} has already left the farm")]
    AlreadyDispatched { order_id: String },

    /// Refund preconditions failed (status, balance, or window).
    #[error("Transaction {transaction_id} is not refundable: {reason}")]
    NotRefundable {
        transaction_id: String,
        reason: String,
    },

    /// Requested refund is larger than what is left to refund.
    #[error("Refund of {requested} exceeds remaining balance {remaining}")]
    RefundExceedsBalance { requested: Money, remaining: Money },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotAuthorized error.
    pub fn not_authorized(reason: impl Into<String>) -> Self {
        CoreError::NotAuthorized {
            reason: reason.into(),
        }
    }

    /// Creates a ProductUnavailable error.
    pub fn unavailable(product_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::ProductUnavailable {
            product_id: product_id.into(),
            reason: reason.into(),
        }
    }

    /// Maps the error onto the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::OrderNotFound(_)
            | CoreError::ProductNotFound(_)
            | CoreError::TransactionNotFound(_) => ErrorKind::NotFound,
            CoreError::NotAuthorized { .. } => ErrorKind::Authorization,
            CoreError::ProductUnavailable { .. }
            | CoreError::SelfPurchase { .. }
            | CoreError::InvalidTotal { .. }
            | CoreError::InvalidTransition { .. }
            | CoreError::InvalidTransactionTransition { .. }
            | CoreError::AlreadyPaid { .. }
            | CoreError::OrderCancelled { .. }
            | CoreError::AlreadyDispatched { .. }
            | CoreError::NotRefundable { .. }
            | CoreError::RefundExceedsBalance { .. } => ErrorKind::Conflict,
        }
    }

    /// Machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ProductUnavailable { .. } => "PRODUCT_UNAVAILABLE",
            CoreError::SelfPurchase { .. } => "SELF_PURCHASE",
            CoreError::InvalidTotal { .. } => "INVALID_TOTAL",
            CoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CoreError::InvalidTransactionTransition { .. } => "INVALID_TRANSACTION_TRANSITION",
            CoreError::NotAuthorized { .. } => "NOT_AUTHORIZED",
            CoreError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            CoreError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            CoreError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CoreError::AlreadyPaid { .. } => "ALREADY_PAID",
            CoreError::OrderCancelled { .. } => "ORDER_CANCELLED",
            CoreError::AlreadyDispatched { .. } => "ALREADY_DISPATCHED",
            CoreError::NotRefundable { .. } => "NOT_REFUNDABLE",
            CoreError::RefundExceedsBalance { .. } => "REFUND_EXCEEDS_BALANCE",
            CoreError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any mutation; every variant names the offending field so
/// the frontend can highlight it.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid phone).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., same product twice in one order).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::Duplicate { field, .. } => field,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
