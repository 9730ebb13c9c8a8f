//! # eSewa Adapter
//!
//! ## Payment Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. initiate   → signed form fields; the browser POSTs them to          │
//! │                  form_url. No server-to-server call.                    │
//! │                                                                         │
//! │  2. redirect   → success_url?data=<base64 JSON>                         │
//! │                  { transaction_code, status, total_amount,              │
//! │                    transaction_uuid, product_code,                      │
//! │                    signed_field_names, signature }                      │
//! │                                                                         │
//! │  3. verify     → check the callback signature locally, then ask         │
//! │                  GET /api/epay/transaction/status/                      │
//! │                      ?product_code&total_amount&transaction_uuid        │
//! │                                                                         │
//! │                  COMPLETE            → Completed                        │
//! │                  PENDING, AMBIGUOUS  → Pending (nothing changes)        │
//! │                  anything else       → Failed                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The redirect alone is never trusted. The status lookup decides.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::PaymentGateway;
use crate::http::{client_for, read_json, scalar_to_string};
use crate::types::{
    CallbackData, GatewayPayload, GatewayVerification, InitiationRequest, PaymentAction,
    AMOUNT_MISMATCH,
};
use doko_core::signature::{sign_payment, verify_response_fields};
use doko_core::{Money, PaymentMethod, Transaction};

const NAME: &str = "esewa";
const STATUS_PATH: &str = "/api/epay/transaction/status/";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    total_amount: Option<serde_json::Value>,
    #[serde(default)]
    ref_id: Option<String>,
}

pub struct EsewaGateway {
    config: GatewayConfig,
    http: reqwest::Client,
}

impl EsewaGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        if config.form_url.is_none() {
            return Err(GatewayError::InvalidConfig("eSewa needs a form URL".into()));
        }
        let http = client_for(&config)?;
        Ok(EsewaGateway { config, http })
    }

    /// Flattens a callback into plain fields.
    ///
    /// Success redirects carry everything inside base64 JSON `data`; failure
    /// redirects carry plain query parameters.
    fn callback_fields(callback: &CallbackData) -> GatewayResult<CallbackData> {
        let Some(data) = callback.get("data") else {
            return Ok(callback.clone());
        };

        // Query-string decoding turns '+' into ' '.
        let data = data.trim().replace(' ', "+");
        let bytes = STANDARD
            .decode(data.as_bytes())
            .map_err(|_| GatewayError::InvalidCallback("data is not base64".into()))?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes)
            .map_err(|_| GatewayError::InvalidCallback("data is not a JSON object".into()))?;

        Ok(object
            .iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
            .collect())
    }

    async fn lookup_status(&self, transaction: &Transaction) -> GatewayResult<serde_json::Value> {
        let mut url = self.config.endpoint(STATUS_PATH)?;
        url.query_pairs_mut()
            .append_pair("product_code", &self.config.merchant_code)
            .append_pair("total_amount", &transaction.amount().to_amount_string())
            .append_pair("transaction_uuid", &transaction.reference);

        debug!(reference = %transaction.reference, "Querying eSewa transaction status");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::from_http(NAME, self.config.timeout, e))?;

        read_json(NAME, self.config.timeout, response).await
    }
}

#[async_trait]
impl PaymentGateway for EsewaGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Esewa
    }

    async fn initiate(&self, request: &InitiationRequest) -> GatewayResult<GatewayPayload> {
        let signed = sign_payment(
            &self.config.secret,
            request.amount,
            &request.reference,
            &self.config.merchant_code,
        )?;

        let form_url = self
            .config
            .form_url
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidConfig("eSewa needs a form URL".into()))?;

        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), signed.total_amount.clone());
        fields.insert("tax_amount".to_string(), "0".to_string());
        fields.insert("product_service_charge".to_string(), "0".to_string());
        fields.insert("product_delivery_charge".to_string(), "0".to_string());
        fields.insert("total_amount".to_string(), signed.total_amount.clone());
        fields.insert("transaction_uuid".to_string(), signed.transaction_uuid.clone());
        fields.insert("product_code".to_string(), signed.product_code.clone());
        fields.insert("success_url".to_string(), self.config.success_url.to_string());
        fields.insert("failure_url".to_string(), self.config.failure_url.to_string());
        fields.insert("signed_field_names".to_string(), signed.signed_field_names.clone());
        fields.insert("signature".to_string(), signed.signature.clone());

        debug!(reference = %request.reference, amount = %request.amount, "Signed eSewa form");

        Ok(GatewayPayload {
            method: PaymentMethod::Esewa,
            action: PaymentAction::FormPost {
                url: form_url.to_string(),
                fields,
            },
            metadata: serde_json::json!({ "signed": signed }),
        })
    }

    fn reference_from_callback(&self, callback: &CallbackData) -> GatewayResult<String> {
        Self::callback_fields(callback)?
            .get("transaction_uuid")
            .filter(|r| !r.trim().is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidCallback("transaction_uuid is missing".into()))
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        callback: Option<&CallbackData>,
    ) -> GatewayResult<GatewayVerification> {
        if let Some(callback) = callback {
            let fields = Self::callback_fields(callback)?;

            if callback.contains_key("data") && !verify_response_fields(&self.config.secret, &fields)? {
                warn!(reference = %transaction.reference, "eSewa callback signature mismatch");
                return Err(GatewayError::SignatureMismatch);
            }

            if let Some(reference) = fields.get("transaction_uuid") {
                if reference != &transaction.reference {
                    return Err(GatewayError::InvalidCallback(
                        "transaction_uuid does not match the transaction".into(),
                    ));
                }
            }
        }

        let raw = self.lookup_status(transaction).await?;
        let parsed: StatusResponse =
            serde_json::from_value(raw.clone()).map_err(|e| GatewayError::MalformedResponse {
                gateway: NAME,
                message: e.to_string(),
            })?;

        if let Some(reported) = parsed.total_amount.as_ref().and_then(scalar_to_string) {
            let reported_amount =
                Money::parse_amount(&reported).ok_or_else(|| GatewayError::MalformedResponse {
                    gateway: NAME,
                    message: format!("unparseable total_amount '{}'", reported),
                })?;
            if reported_amount != transaction.amount() {
                warn!(
                    reference = %transaction.reference,
                    expected = %transaction.amount(),
                    reported = %reported_amount,
                    "eSewa reported a different amount"
                );
                return Ok(GatewayVerification::failed(
                    parsed.status,
                    AMOUNT_MISMATCH,
                    format!(
                        "gateway reported {} for a {} transaction",
                        reported_amount,
                        transaction.amount()
                    ),
                    raw,
                ));
            }
        }

        debug!(reference = %transaction.reference, status = %parsed.status, ref_id = ?parsed.ref_id, "eSewa status");

        Ok(match parsed.status.as_str() {
            "COMPLETE" => GatewayVerification::completed(parsed.status, raw),
            "PENDING" | "AMBIGUOUS" => GatewayVerification::pending(parsed.status, raw),
            other => {
                let message = format!("eSewa reported status {}", other);
                GatewayVerification::failed(other, other, message, raw)
            }
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
