//! # doko-gateway: Payment Gateway Adapters
//!
//! One async trait, three implementations.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        GatewayRegistry                                  │
//! │                                                                         │
//! │   PaymentMethod::Esewa          ──► EsewaGateway                        │
//! │   PaymentMethod::Khalti         ──► KhaltiGateway                       │
//! │   PaymentMethod::CashOnDelivery ──► CashOnDeliveryGateway               │
//! │                                                                         │
//! │   Every outbound request is bounded by GatewayConfig::timeout.          │
//! │   A timeout is retryable and never marks a payment failed.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`gateway`] - The [`PaymentGateway`] trait
//! - [`esewa`] - Signed form post + status lookup
//! - [`khalti`] - Server-side initiate + lookup
//! - [`cod`] - Cash on delivery (no network)
//! - [`registry`] - Method to adapter lookup
//! - [`config`] - Per-gateway merchant configuration
//! - [`error`] - Gateway error types

pub mod cod;
pub mod config;
pub mod error;
pub mod esewa;
pub mod gateway;
mod http;
pub mod khalti;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cod::CashOnDeliveryGateway;
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use esewa::EsewaGateway;
pub use gateway::PaymentGateway;
pub use khalti::KhaltiGateway;
pub use registry::GatewayRegistry;
pub use types::{
    CallbackData, GatewayPayload, GatewayVerification, InitiationRequest, PaymentAction,
    VerificationOutcome, AMOUNT_MISMATCH,
};
