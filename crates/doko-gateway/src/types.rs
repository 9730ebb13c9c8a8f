//! Request and result types shared by every adapter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use doko_core::{Money, PaymentMethod};

/// Raw key/value pairs from a gateway redirect (query string or form body).
pub type CallbackData = HashMap<String, String>;

/// What the payment service asks a gateway to start.
#[derive(Debug, Clone)]
pub struct InitiationRequest {
    pub transaction_id: String,
    /// Unique id we hand to the gateway and match callbacks on.
    pub reference: String,
    pub order_id: String,
    pub amount: Money,
    /// Shown on the gateway's checkout page.
    pub description: String,
    pub customer_name: String,
    pub customer_phone: String,
}

/// What the client must do next to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentAction {
    /// Browser POSTs `fields` to `url` (eSewa).
    FormPost {
        url: String,
        fields: BTreeMap<String, String>,
    },
    /// Browser navigates to `url` (Khalti).
    Redirect { url: String },
    /// Nothing to do online (cash on delivery).
    None,
}

/// Result of `initiate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub method: PaymentMethod,
    pub action: PaymentAction,
    /// Stored on the transaction (e.g. Khalti `pidx`).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Completed,
    Failed,
    /// The gateway has no final answer yet. Nothing changes.
    Pending,
}

/// The gateway's answer about one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayVerification {
    pub outcome: VerificationOutcome,
    /// Gateway-native status string (`COMPLETE`, `User canceled`, ...).
    pub status: String,
    pub code: Option<String>,
    pub message: Option<String>,
    /// Full lookup response, kept as transaction metadata.
    pub raw: serde_json::Value,
}

impl GatewayVerification {
    pub fn completed(status: impl Into<String>, raw: serde_json::Value) -> Self {
        GatewayVerification {
            outcome: VerificationOutcome::Completed,
            status: status.into(),
            code: None,
            message: None,
            raw,
        }
    }

    pub fn pending(status: impl Into<String>, raw: serde_json::Value) -> Self {
        GatewayVerification {
            outcome: VerificationOutcome::Pending,
            status: status.into(),
            code: None,
            message: None,
            raw,
        }
    }

    pub fn failed(
        status: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        raw: serde_json::Value,
    ) -> Self {
        GatewayVerification {
            outcome: VerificationOutcome::Failed,
            status: status.into(),
            code: Some(code.into()),
            message: Some(message.into()),
            raw,
        }
    }
}

/// Failure code when the gateway reports a different amount than we charged.
pub const AMOUNT_MISMATCH: &str = "AMOUNT_MISMATCH";
