//! # PaymentGateway Trait
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PaymentService                                                         │
//! │      │                                                                  │
//! │      │  registry.get(method)                                            │
//! │      ▼                                                                  │
//! │  Arc<dyn PaymentGateway>                                                │
//! │      ├── EsewaGateway           signed form, status lookup              │
//! │      ├── KhaltiGateway          initiate + lookup over HTTP             │
//! │      └── CashOnDeliveryGateway  no network                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Adapters never touch the database. They describe what the gateway said;
//! the payment service decides what to persist.

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{CallbackData, GatewayPayload, GatewayVerification, InitiationRequest};
use doko_core::{PaymentMethod, Transaction};

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// The payment method this adapter serves.
    fn method(&self) -> PaymentMethod;

    /// Starts a payment and returns what the client needs to complete it.
    async fn initiate(&self, request: &InitiationRequest) -> GatewayResult<GatewayPayload>;

    /// Extracts our transaction reference from a redirect callback.
    fn reference_from_callback(&self, callback: &CallbackData) -> GatewayResult<String>;

    /// Asks the gateway for the final state of `transaction`.
    ///
    /// `callback` is `None` when the reconciler re-checks a stale
    /// transaction without a redirect.
    async fn verify(
        &self,
        transaction: &Transaction,
        callback: Option<&CallbackData>,
    ) -> GatewayResult<GatewayVerification>;
}
