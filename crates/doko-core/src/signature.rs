//! # Signature Module
//!
//! HMAC-SHA256 signing of payment gateway payloads.
//!
//! ## Signing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  amount (Money) ─► "550.00"                                             │
//! │  reference      ─► "4f6c...e1"          canonical message               │
//! │  product_code   ─► "EPAYTEST"  ──────►  total_amount=550.00,            │
//! │                                         transaction_uuid=4f6c...e1,     │
//! │                                         product_code=EPAYTEST           │
//! │                                                │                        │
//! │                              secret ──► HMAC-SHA256                     │
//! │                                                │                        │
//! │                                                ▼                        │
//! │                                       base64 (standard, padded)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same inputs and secret always produce the same signature. Gateway
//! responses are verified by recomputing over the fields they list in
//! `signed_field_names` and comparing in constant time.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

use crate::money::Money;

type HmacSha256 = Hmac<Sha256>;

/// Field list signed into every outgoing payment payload.
pub const SIGNED_FIELD_NAMES: &str = "total_amount,transaction_uuid,product_code";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signing secret is empty")]
    EmptySecret,

    #[error("signature is not valid base64")]
    MalformedSignature,

    #[error("signed field '{0}' is missing from the payload")]
    MissingField(String),
}

// =============================================================================
// Primitives
// =============================================================================

/// Builds the canonical message for a payment request.
///
/// ```rust
/// use doko_core::signature::canonical_message;
///
/// assert_eq!(
///     canonical_message("100.00", "TXN-1", "MERCH"),
///     "total_amount=100.00,transaction_uuid=TXN-1,product_code=MERCH"
/// );
/// ```
pub fn canonical_message(total_amount: &str, transaction_uuid: &str, product_code: &str) -> String {
    format!(
        "total_amount={},transaction_uuid={},product_code={}",
        total_amount, transaction_uuid, product_code
    )
}

fn mac_for(secret: &str, message: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::EmptySecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::EmptySecret)?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Signs `message` with `secret`; returns the base64 digest.
pub fn sign(secret: &str, message: &str) -> Result<String, SignatureError> {
    let mac = mac_for(secret, message)?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Checks a base64 signature over `message` in constant time.
///
/// Returns `Ok(false)` for a well-formed but wrong signature.
pub fn verify_signature(
    secret: &str,
    message: &str,
    signature: &str,
) -> Result<bool, SignatureError> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| SignatureError::MalformedSignature)?;
    let mac = mac_for(secret, message)?;
    Ok(mac.verify_slice(&expected).is_ok())
}

// =============================================================================
// Payment Payloads
// =============================================================================

/// A signed payment request, ready to be posted to a gateway form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub signed_field_names: String,
    pub signature: String,
}

/// Signs a payment request for `amount` under `reference`.
///
/// ## Example
/// ```rust
/// use doko_core::{signature::sign_payment, Money};
///
/// let payload = sign_payment("8gBm/:&EnhH.1/q", Money::from_rupees(100), "TXN-1", "MERCH").unwrap();
/// assert_eq!(payload.total_amount, "100.00");
/// assert_eq!(payload.signature, "ck5llCdb05mXBaU9kUKFDEaUThq1V/cUU+O2gvIBYvs=");
/// ```
pub fn sign_payment(
    secret: &str,
    amount: Money,
    reference: &str,
    product_code: &str,
) -> Result<SignedPayload, SignatureError> {
    let total_amount = amount.to_amount_string();
    let message = canonical_message(&total_amount, reference, product_code);
    let signature = sign(secret, &message)?;

    Ok(SignedPayload {
        total_amount,
        transaction_uuid: reference.to_string(),
        product_code: product_code.to_string(),
        signed_field_names: SIGNED_FIELD_NAMES.to_string(),
        signature,
    })
}

/// Rebuilds the message a gateway signed, from its own field list.
///
/// `signed_field_names` is a comma-separated list; each listed field is
/// looked up in `fields` and joined as `name=value` pairs in that order.
pub fn message_from_fields(
    signed_field_names: &str,
    fields: &HashMap<String, String>,
) -> Result<String, SignatureError> {
    let mut parts = Vec::new();
    for name in signed_field_names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let value = fields
            .get(name)
            .ok_or_else(|| SignatureError::MissingField(name.to_string()))?;
        parts.push(format!("{}={}", name, value));
    }
    Ok(parts.join(","))
}

/// Verifies a gateway response that carries `signed_field_names` and
/// `signature` alongside the signed fields.
pub fn verify_response_fields(
    secret: &str,
    fields: &HashMap<String, String>,
) -> Result<bool, SignatureError> {
    let names = fields
        .get("signed_field_names")
        .ok_or_else(|| SignatureError::MissingField("signed_field_names".to_string()))?;
    let signature = fields
        .get("signature")
        .ok_or_else(|| SignatureError::MissingField("signature".to_string()))?;

    let message = message_from_fields(names, fields)?;
    verify_signature(secret, &message, signature)
}

// =============================================================================
// Unit Tests
// =============================================================================
