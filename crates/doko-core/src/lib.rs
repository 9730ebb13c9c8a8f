//! # doko-core: Pure Business Logic for DOKO
//!
//! This crate holds the order and payment rules of the DOKO marketplace as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DOKO Backend Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Frontend (React)                             │   │
//! │  │    Catalog ──► Cart ──► Checkout ──► eSewa / Khalti redirect    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP (JSON)                            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    apps/api (axum handlers + services)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ doko-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐ ┌──────────┐ │   │
//! │  │   │  types  │ │  money  │ │lifecycle │ │ policy │ │signature │ │   │
//! │  │   │ Order   │ │  Money  │ │ status   │ │ roles  │ │ HMAC     │ │   │
//! │  │   │ Txn     │ │ (paisa) │ │ machines │ │ caps   │ │ SHA256   │ │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └────────┘ └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼──────┐  ┌─────────────────────────┐   │
//! │  │  doko-db (SQLite repositories)     │  │ doko-gateway (adapters) │   │
//! │  └────────────────────────────────────┘  └─────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Order, Transaction, ...)
//! - [`money`] - Money type with integer paisa arithmetic
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//! - [`lifecycle`] - Order and transaction state machines
//! - [`policy`] - Role/capability authorization and refund policy
//! - [`pricing`] - Line items, shipping fee and order totals
//! - [`signature`] - HMAC-SHA256 signing of gateway payloads
//!
//! ## Example Usage
//!
//! ```rust
//! use doko_core::money::Money;
//! use doko_core::pricing::ShippingPolicy;
//!
//! let subtotal = Money::from_rupees(500);
//! let shipping = ShippingPolicy::flat(Money::from_rupees(50)).fee_for(subtotal);
//!
//! assert_eq!((subtotal + shipping).to_amount_string(), "550.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lifecycle;
pub mod money;
pub mod policy;
pub mod pricing;
pub mod signature;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::Money;
pub use policy::{Actor, Capability, RefundPolicy};
pub use pricing::ShippingPolicy;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct products in a single order.
pub const MAX_ORDER_LINES: usize = 50;

/// Maximum quantity of a single product in one order.
///
/// Farm produce is sold in kg/crates, so this is generous; it mainly stops
/// typos like 10000 instead of 10.
pub const MAX_LINE_QUANTITY: i64 = 9_999;

/// Default refund eligibility window, in days from payment completion.
pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 30;

/// Default flat delivery fee in paisa (Rs. 50).
pub const DEFAULT_SHIPPING_FEE_PAISA: i64 = 5_000;
