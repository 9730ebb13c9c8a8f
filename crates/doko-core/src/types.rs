//! # Domain Types
//!
//! Core domain types used throughout DOKO.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Order      │   │  Transaction    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, seller_id  │   │  buyer_id       │   │  order_id (FK)  │       │
//! │  │  price_paisa    │   │  items (owned)  │   │  reference      │       │
//! │  │  stock_quantity │   │  totals         │   │  amount         │       │
//! │  │  is_available   │   │  shipping addr  │   │  refunded       │       │
//! │  └─────────────────┘   │  payment info   │   │  refunds[]      │       │
//! │                        │  status         │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌──────────────────┐      │
//! │  │  OrderStatus    │   │ PaymentStatus   │   │TransactionStatus │      │
//! │  │  Created        │   │ Initiated       │   │ Initiated        │      │
//! │  │  Confirmed      │   │ Pending         │   │ Pending          │      │
//! │  │  Dispatched     │   │ Paid            │   │ Completed        │      │
//! │  │  Delivered      │   │ Failed          │   │ Failed           │      │
//! │  │  Cancelled      │   │ Refunded        │   │ Refunded         │      │
//! │  └─────────────────┘   └─────────────────┘   └──────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An order exclusively owns its line items and shipping address. A
//! transaction references its order by id; an order may have several
//! transactions (one per payment attempt).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A farm product listed by a seller.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// The farmer who owns this listing.
    pub seller_id: String,

    pub name: String,

    pub description: Option<String>,

    /// Selling unit shown next to the price ("kg", "crate", "dozen").
    pub unit: String,

    /// Price per unit in paisa.
    pub price_paisa: i64,

    /// Sellable unit count. Never negative.
    pub stock_quantity: i64,

    /// Derived: `stock_quantity > 0`. Kept as a column so catalog queries
    /// can filter on it directly.
    pub is_available: bool,

    /// Soft delete flag. Products referenced by orders are never removed.
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the unit price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_paisa(self.price_paisa)
    }

    /// Checks whether `quantity` units can be ordered right now.
    ///
    /// This is an early, friendly check only. The authoritative check is the
    /// conditional decrement in the database.
    pub fn can_fulfil(&self, quantity: i64) -> bool {
        self.is_active && self.is_available && self.stock_quantity >= quantity
    }
}

// =============================================================================
// Roles
// =============================================================================

/// The closed set of marketplace roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    /// A seller. Older clients send `seller`.
    #[serde(alias = "seller")]
    Farmer,
    Transporter,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Farmer => "farmer",
            Role::Transporter => "transporter",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Fulfilment status of an order.
///
/// ```text
/// Created ──► Confirmed ──► Dispatched ──► Delivered
///    │            │             │
///    └────────────┴─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Confirmed,
    Dispatched,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Created
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Status (order-level)
// =============================================================================

/// Payment status as seen from the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// A digital payment was started (or is expected).
    Initiated,
    /// Cash on delivery, or a gateway reported an in-flight payment.
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Paid or refunded orders accept no new payment attempts.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// eSewa digital wallet (signed form post).
    Esewa,
    /// Khalti digital wallet (server-side initiation).
    Khalti,
    /// Cash collected by the transporter on delivery.
    #[serde(alias = "cod")]
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Esewa => "esewa",
            PaymentMethod::Khalti => "khalti",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
        }
    }

    /// Digital methods go through an external gateway.
    pub fn is_digital(&self) -> bool {
        !matches!(self, PaymentMethod::CashOnDelivery)
    }

    /// Initial order payment status for this method.
    pub fn initial_payment_status(&self) -> PaymentStatus {
        if self.is_digital() {
            PaymentStatus::Initiated
        } else {
            PaymentStatus::Pending
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the `{gateway}` path segment.
impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "esewa" => Ok(PaymentMethod::Esewa),
            "khalti" => Ok(PaymentMethod::Khalti),
            "cod" | "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            _ => Err(ValidationError::NotAllowed {
                field: "payment_method".to_string(),
                allowed: vec![
                    "esewa".to_string(),
                    "khalti".to_string(),
                    "cash_on_delivery".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// One product-quantity-price entry of an order.
///
/// Uses the snapshot pattern: seller, name and unit price are frozen at
/// order creation so later catalog edits never touch existing orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub product_id: String,
    /// Seller at time of order (frozen).
    pub seller_id: String,
    /// Product name at time of order (frozen).
    pub name: String,
    pub quantity: i64,
    /// Unit price at time of order (frozen).
    pub unit_price: Money,
    /// `unit_price × quantity`.
    pub line_total: Money,
}

/// Computed totals. `grand_total = subtotal + shipping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub shipping: Money,
    pub grand_total: Money,
}

/// Delivery address embedded in the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShippingAddress {
    pub recipient_name: String,
    pub phone: String,
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
}

/// Payment sub-record of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
}

/// A buyer's order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub shipping_address: ShippingAddress,
    pub payment: PaymentInfo,
    pub status: OrderStatus,
    /// Transporter assigned to carry the order, if any.
    pub transporter_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_buyer(&self, user_id: &str) -> bool {
        self.buyer_id == user_id
    }

    /// True if `user_id` sells at least one line of this order.
    pub fn is_seller(&self, user_id: &str) -> bool {
        self.items.iter().any(|item| item.seller_id == user_id)
    }

    pub fn is_assigned_transporter(&self, user_id: &str) -> bool {
        self.transporter_id.as_deref() == Some(user_id)
    }
}

/// A cart line as submitted by the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
}

// =============================================================================
// Transaction
// =============================================================================

/// Status of a single payment attempt.
///
/// ```text
/// Initiated ──► Pending ──► Completed ──► Refunded
///     │            │            ▲
///     │            └──► Failed  │
///     ├──► Failed               │
///     └─────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Initiated,
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (partial) refund applied to a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RefundRecord {
    pub id: String,
    pub transaction_id: String,
    pub amount_paisa: i64,
    pub reason: String,
    /// Who issued the refund (admin user id, or the cancelling actor).
    pub actor_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Failure code of an attempt replaced by a newer one for the same order.
pub const SUPERSEDED: &str = "SUPERSEDED";

/// Failure code of an attempt closed because its order was cancelled.
pub const ORDER_CANCELLED: &str = "ORDER_CANCELLED";

/// The system's record of one payment attempt against an order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Transaction {
    pub id: String,
    pub order_id: String,
    pub buyer_id: String,
    pub method: PaymentMethod,
    /// Unique identifier sent to the gateway (eSewa `transaction_uuid`,
    /// Khalti `purchase_order_id`). Callbacks are matched on this.
    pub reference: String,
    pub amount_paisa: i64,
    /// Cumulative refunded amount. Never exceeds `amount_paisa`.
    pub refunded_paisa: i64,
    pub status: TransactionStatus,
    /// Gateway-specific data (pidx, raw status payloads). Opaque here.
    #[ts(type = "unknown")]
    pub gateway_metadata: serde_json::Value,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    /// Last upstream error seen while talking to the gateway. Recorded
    /// without changing `status`.
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    pub refunds: Vec<RefundRecord>,
}

impl Transaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_paisa(self.amount_paisa)
    }

    #[inline]
    pub fn refunded(&self) -> Money {
        Money::from_paisa(self.refunded_paisa)
    }

    /// Amount still refundable.
    #[inline]
    pub fn remaining(&self) -> Money {
        self.amount() - self.refunded()
    }

    /// Closed on our side while the buyer may still finish paying at the
    /// gateway. A confirmation for it is accepted and refunded at once.
    pub fn may_still_capture(&self) -> bool {
        self.method.is_digital()
            && self.status == TransactionStatus::Failed
            && matches!(
                self.failure_code.as_deref(),
                Some(SUPERSEDED) | Some(ORDER_CANCELLED)
            )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
