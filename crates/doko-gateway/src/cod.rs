//! # Cash on Delivery
//!
//! No gateway. The transaction is opened `pending` at checkout and settled
//! by the order service when the transporter marks the order delivered.

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::PaymentGateway;
use crate::types::{
    CallbackData, GatewayPayload, GatewayVerification, InitiationRequest, PaymentAction,
};
use doko_core::{PaymentMethod, Transaction};

#[derive(Debug, Default, Clone, Copy)]
pub struct CashOnDeliveryGateway;

#[async_trait]
impl PaymentGateway for CashOnDeliveryGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CashOnDelivery
    }

    async fn initiate(&self, _request: &InitiationRequest) -> GatewayResult<GatewayPayload> {
        Ok(GatewayPayload {
            method: PaymentMethod::CashOnDelivery,
            action: PaymentAction::None,
            metadata: serde_json::json!({}),
        })
    }

    fn reference_from_callback(&self, _callback: &CallbackData) -> GatewayResult<String> {
        Err(GatewayError::InvalidCallback(
            "cash on delivery has no gateway callbacks".into(),
        ))
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        _callback: Option<&CallbackData>,
    ) -> GatewayResult<GatewayVerification> {
        Ok(GatewayVerification::pending(
            transaction.status.as_str(),
            serde_json::json!({}),
        ))
    }
}
