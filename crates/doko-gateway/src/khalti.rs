//! # Khalti Adapter
//!
//! ## Payment Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. initiate   POST /epayment/initiate/   Authorization: Key <secret>   │
//! │                { return_url, website_url, amount (paisa),               │
//! │                  purchase_order_id, purchase_order_name,                │
//! │                  customer_info }                                        │
//! │                ◄── { pidx, payment_url, expires_at }                    │
//! │                                                                         │
//! │  2. redirect   return_url?pidx&status&purchase_order_id&...             │
//! │                                                                         │
//! │  3. verify     POST /epayment/lookup/ { pidx }                          │
//! │                ◄── { pidx, total_amount, status, transaction_id }       │
//! │                                                                         │
//! │                Completed            → Completed                         │
//! │                Pending, Initiated   → Pending (nothing changes)         │
//! │                anything else        → Failed                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pidx is stored on the transaction at initiation, so the reconciler
//! can verify without a redirect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::PaymentGateway;
use crate::http::{client_for, read_json};
use crate::types::{
    CallbackData, GatewayPayload, GatewayVerification, InitiationRequest, PaymentAction,
    AMOUNT_MISMATCH,
};
use doko_core::signature::sign_payment;
use doko_core::{PaymentMethod, Transaction};

const NAME: &str = "khalti";
const INITIATE_PATH: &str = "/epayment/initiate/";
const LOOKUP_PATH: &str = "/epayment/lookup/";

#[derive(Debug, Serialize)]
struct CustomerInfo<'a> {
    name: &'a str,
    phone: &'a str,
}

#[derive(Debug, Serialize)]
struct InitiateBody<'a> {
    return_url: &'a str,
    website_url: String,
    amount: i64,
    purchase_order_id: &'a str,
    purchase_order_name: &'a str,
    customer_info: CustomerInfo<'a>,
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    pidx: String,
    payment_url: String,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    total_amount: Option<i64>,
    #[serde(default)]
    transaction_id: Option<String>,
}

pub struct KhaltiGateway {
    config: GatewayConfig,
    http: reqwest::Client,
}

impl KhaltiGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let http = client_for(&config)?;
        Ok(KhaltiGateway { config, http })
    }

    fn authorization(&self) -> String {
        format!("Key {}", self.config.secret)
    }

    async fn post(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> GatewayResult<serde_json::Value> {
        let url = self.config.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::from_http(NAME, self.config.timeout, e))?;

        read_json(NAME, self.config.timeout, response).await
    }

    /// Picks the pidx to look up, refusing a callback that names a different
    /// payment than the one we initiated.
    fn pidx_for(transaction: &Transaction, callback: Option<&CallbackData>) -> GatewayResult<String> {
        let stored = transaction
            .gateway_metadata
            .get("pidx")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let from_callback = callback
            .and_then(|c| c.get("pidx"))
            .filter(|p| !p.trim().is_empty())
            .cloned();

        match (stored, from_callback) {
            (Some(stored), Some(given)) if stored != given => Err(GatewayError::InvalidCallback(
                "pidx does not match the transaction".into(),
            )),
            (Some(pidx), _) | (None, Some(pidx)) => Ok(pidx),
            (None, None) => Err(GatewayError::InvalidCallback(
                "no pidx on the callback or the transaction".into(),
            )),
        }
    }
}

fn malformed(message: impl ToString) -> GatewayError {
    GatewayError::MalformedResponse {
        gateway: NAME,
        message: message.to_string(),
    }
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Khalti
    }

    async fn initiate(&self, request: &InitiationRequest) -> GatewayResult<GatewayPayload> {
        // Same canonical signature as eSewa, kept with the transaction for audit.
        let signed = sign_payment(
            &self.config.secret,
            request.amount,
            &request.reference,
            &self.config.merchant_code,
        )?;

        let body = InitiateBody {
            return_url: self.config.success_url.as_str(),
            website_url: self.config.success_url.origin().ascii_serialization(),
            amount: request.amount.paisa(),
            purchase_order_id: &request.reference,
            purchase_order_name: &request.description,
            customer_info: CustomerInfo {
                name: &request.customer_name,
                phone: &request.customer_phone,
            },
        };

        debug!(reference = %request.reference, amount = %request.amount, "Initiating Khalti payment");

        let raw = self.post(INITIATE_PATH, &body).await?;
        let parsed: InitiateResponse = serde_json::from_value(raw).map_err(malformed)?;

        Ok(GatewayPayload {
            method: PaymentMethod::Khalti,
            action: PaymentAction::Redirect {
                url: parsed.payment_url.clone(),
            },
            metadata: serde_json::json!({
                "pidx": parsed.pidx,
                "payment_url": parsed.payment_url,
                "expires_at": parsed.expires_at,
                "signed": signed,
            }),
        })
    }

    fn reference_from_callback(&self, callback: &CallbackData) -> GatewayResult<String> {
        callback
            .get("purchase_order_id")
            .filter(|r| !r.trim().is_empty())
            .cloned()
            .ok_or_else(|| GatewayError::InvalidCallback("purchase_order_id is missing".into()))
    }

    async fn verify(
        &self,
        transaction: &Transaction,
        callback: Option<&CallbackData>,
    ) -> GatewayResult<GatewayVerification> {
        if let Some(reference) = callback.and_then(|c| c.get("purchase_order_id")) {
            if reference != &transaction.reference {
                return Err(GatewayError::InvalidCallback(
                    "purchase_order_id does not match the transaction".into(),
                ));
            }
        }

        let pidx = Self::pidx_for(transaction, callback)?;
        let raw = self
            .post(LOOKUP_PATH, &serde_json::json!({ "pidx": pidx }))
            .await?;
        let parsed: LookupResponse = serde_json::from_value(raw.clone()).map_err(malformed)?;

        debug!(
            reference = %transaction.reference,
            pidx = %pidx,
            status = %parsed.status,
            khalti_txn = ?parsed.transaction_id,
            "Khalti lookup"
        );

        match parsed.status.as_str() {
            "Completed" => {
                if let Some(total) = parsed.total_amount {
                    if total != transaction.amount_paisa {
                        warn!(
                            reference = %transaction.reference,
                            expected = transaction.amount_paisa,
                            reported = total,
                            "Khalti reported a different amount"
                        );
                        return Ok(GatewayVerification::failed(
                            parsed.status,
                            AMOUNT_MISMATCH,
                            format!(
                                "gateway reported {} paisa for a {} paisa transaction",
                                total, transaction.amount_paisa
                            ),
                            raw,
                        ));
                    }
                }
                Ok(GatewayVerification::completed(parsed.status, raw))
            }
            "Pending" | "Initiated" => Ok(GatewayVerification::pending(parsed.status, raw)),
            other => {
                // "User canceled" → USER_CANCELED
                let code = other.to_ascii_uppercase().replace(' ', "_");
                let message = format!("Khalti reported status {}", other);
                Ok(GatewayVerification::failed(other, code, message, raw))
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{config_for, spawn_mock, transaction, TEST_SECRET};
    use crate::types::VerificationOutcome;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use doko_core::Money;
    use std::collections::HashMap;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Key {}", TEST_SECRET))
            .unwrap_or(false)
    }

    /// Initiate always hands out `pidx-1`; lookup answers `status` with
    /// `total_amount` paisa.
    fn khalti_router(status: &'static str, total_amount: i64) -> Router {
        Router::new()
            .route(
                INITIATE_PATH,
                post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                    if !authorized(&headers) {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({ "detail": "Invalid token." })),
                        )
                            .into_response();
                    }
                    Json(serde_json::json!({
                        "pidx": "pidx-1",
                        "payment_url": format!("https://test-pay.khalti.com/?pidx=pidx-1&amount={}", body["amount"]),
                        "expires_at": "2026-10-19T12:00:00+05:45",
                        "expires_in": 1800,
                    }))
                    .into_response()
                }),
            )
            .route(
                LOOKUP_PATH,
                post(move |Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({
                        "pidx": body["pidx"],
                        "total_amount": total_amount,
                        "status": status,
                        "transaction_id": "GFq9PFS7b2iYvL8Lir9oXe",
                        "fee": 0,
                        "refunded": false,
                    }))
                }),
            )
    }

    fn request(amount: Money) -> InitiationRequest {
        InitiationRequest {
            transaction_id: "txn-1".into(),
            reference: "ref-1".into(),
            order_id: "order-1".into(),
            amount,
            description: "DOKO order order-1".into(),
            customer_name: "Sita Sharma".into(),
            customer_phone: "9841234567".into(),
        }
    }

    #[tokio::test]
    async fn test_initiate_returns_redirect_and_pidx() {
        let base = spawn_mock(khalti_router("Completed", 55_000)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();

        let payload = gateway.initiate(&request(Money::from_paisa(55_000))).await.unwrap();
        assert_eq!(
            payload.action,
            PaymentAction::Redirect {
                url: "https://test-pay.khalti.com/?pidx=pidx-1&amount=55000".into()
            }
        );
        assert_eq!(payload.metadata["pidx"], "pidx-1");
        assert_eq!(payload.metadata["signed"]["total_amount"], "550.00");
    }

    #[tokio::test]
    async fn test_initiate_with_wrong_key_is_rejected() {
        let base = spawn_mock(khalti_router("Completed", 55_000)).await;
        let mut config = config_for(&base);
        config.secret = "wrong-key".into();
        let gateway = KhaltiGateway::new(config).unwrap();

        let err = gateway.initiate(&request(Money::from_paisa(55_000))).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { status: 401, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_initiate_unreachable_is_unavailable() {
        // Nothing listens on port 9 locally.
        let gateway = KhaltiGateway::new(config_for("http://127.0.0.1:9")).unwrap();
        let err = gateway.initiate(&request(Money::from_paisa(100))).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_verify_with_stored_pidx() {
        let base = spawn_mock(khalti_router("Completed", 55_000)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();

        let mut txn = transaction(PaymentMethod::Khalti, "ref-1", 55_000);
        txn.gateway_metadata = serde_json::json!({ "pidx": "pidx-1" });

        let result = gateway.verify(&txn, None).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Completed);
        assert_eq!(result.raw["pidx"], "pidx-1");
    }

    #[tokio::test]
    async fn test_verify_status_mapping() {
        let mut txn = transaction(PaymentMethod::Khalti, "ref-1", 55_000);
        txn.gateway_metadata = serde_json::json!({ "pidx": "pidx-1" });

        let base = spawn_mock(khalti_router("Initiated", 55_000)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();
        assert_eq!(
            gateway.verify(&txn, None).await.unwrap().outcome,
            VerificationOutcome::Pending
        );

        let base = spawn_mock(khalti_router("User canceled", 55_000)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();
        let result = gateway.verify(&txn, None).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Failed);
        assert_eq!(result.code.as_deref(), Some("USER_CANCELED"));

        let base = spawn_mock(khalti_router("Completed", 100)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();
        let result = gateway.verify(&txn, None).await.unwrap();
        assert_eq!(result.outcome, VerificationOutcome::Failed);
        assert_eq!(result.code.as_deref(), Some(AMOUNT_MISMATCH));
    }

    #[tokio::test]
    async fn test_callback_must_match_transaction() {
        let base = spawn_mock(khalti_router("Completed", 55_000)).await;
        let gateway = KhaltiGateway::new(config_for(&base)).unwrap();
        let mut txn = transaction(PaymentMethod::Khalti, "ref-1", 55_000);
        txn.gateway_metadata = serde_json::json!({ "pidx": "pidx-1" });

        let swapped_pidx = HashMap::from([
            ("pidx".to_string(), "pidx-other".to_string()),
            ("purchase_order_id".to_string(), "ref-1".to_string()),
        ]);
        assert!(gateway.verify(&txn, Some(&swapped_pidx)).await.unwrap_err().is_callback_error());

        let callback = HashMap::from([
            ("pidx".to_string(), "pidx-1".to_string()),
            ("purchase_order_id".to_string(), "ref-1".to_string()),
            ("status".to_string(), "Completed".to_string()),
        ]);
        assert_eq!(gateway.reference_from_callback(&callback).unwrap(), "ref-1");
        assert_eq!(
            gateway.verify(&txn, Some(&callback)).await.unwrap().outcome,
            VerificationOutcome::Completed
        );

        let bare = transaction(PaymentMethod::Khalti, "ref-1", 55_000);
        assert!(gateway.verify(&bare, None).await.unwrap_err().is_callback_error());
    }
}
