//! # Gateway Configuration
//!
//! Merchant credentials and endpoints for one provider. Built by the
//! application from its own config and passed in; nothing here reads the
//! process environment.
//!
//! ## Sandbox Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  eSewa                                                                  │
//! │    base_url  https://rc.esewa.com.np          (status lookups)          │
//! │    form_url  https://rc-epay.esewa.com.np/api/epay/main/v2/form         │
//! │    merchant  EPAYTEST                                                   │
//! │                                                                         │
//! │  Khalti                                                                 │
//! │    base_url  https://dev.khalti.com/api/v2    (initiate + lookup)       │
//! │    form_url  (none; payment_url comes back from initiate)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use url::Url;

use crate::error::{GatewayError, GatewayResult};

/// Default bound on every outbound gateway request.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const ESEWA_SANDBOX_BASE_URL: &str = "https://rc.esewa.com.np";
pub const ESEWA_SANDBOX_FORM_URL: &str = "https://rc-epay.esewa.com.np/api/epay/main/v2/form";
pub const ESEWA_SANDBOX_MERCHANT: &str = "EPAYTEST";
pub const KHALTI_SANDBOX_BASE_URL: &str = "https://dev.khalti.com/api/v2";

/// Configuration for one payment gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    /// eSewa `product_code`; Khalti ignores it except in audit payloads.
    pub merchant_code: String,

    /// HMAC key (eSewa) or API secret key (Khalti).
    pub secret: String,

    /// API root for server-to-server calls.
    pub base_url: Url,

    /// Browser form target (eSewa only).
    pub form_url: Option<Url>,

    /// Where the gateway sends the buyer after a successful payment.
    pub success_url: Url,

    /// Where the gateway sends the buyer after a cancelled or failed payment.
    pub failure_url: Url,

    /// Request timeout for every outbound call.
    pub timeout: Duration,
}

impl GatewayConfig {
    /// Creates a config with the default timeout and no form URL.
    pub fn new(
        merchant_code: impl Into<String>,
        secret: impl Into<String>,
        base_url: &str,
        success_url: &str,
        failure_url: &str,
    ) -> GatewayResult<Self> {
        let config = GatewayConfig {
            merchant_code: merchant_code.into(),
            secret: secret.into(),
            base_url: Url::parse(base_url)?,
            form_url: None,
            success_url: Url::parse(success_url)?,
            failure_url: Url::parse(failure_url)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the browser form target.
    pub fn form_url(mut self, form_url: &str) -> GatewayResult<Self> {
        self.form_url = Some(Url::parse(form_url)?);
        Ok(self)
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks the parts every adapter relies on.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.merchant_code.trim().is_empty() {
            return Err(GatewayError::InvalidConfig("merchant code is empty".into()));
        }
        if self.secret.is_empty() {
            return Err(GatewayError::InvalidConfig("secret is empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }

    /// Joins `path` onto `base_url`, keeping any path prefix on the base.
    ///
    /// `https://dev.khalti.com/api/v2` + `/epayment/lookup/` gives
    /// `https://dev.khalti.com/api/v2/epayment/lookup/`.
    pub fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path))?)
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("merchant_code", &self.merchant_code)
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .field("form_url", &self.form_url.as_ref().map(Url::as_str))
            .field("success_url", &self.success_url.as_str())
            .field("failure_url", &self.failure_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GatewayConfig {
        GatewayConfig::new(
            "EPAYTEST",
            "8gBm/:&EnhH.1/q",
            "https://dev.khalti.com/api/v2/",
            "https://doko.example/payments/success",
            "https://doko.example/payments/failure",
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = sample();
        assert_eq!(
            config.endpoint("/epayment/lookup/").unwrap().as_str(),
            "https://dev.khalti.com/api/v2/epayment/lookup/"
        );
    }

    #[test]
    fn test_validation() {
        assert!(GatewayConfig::new(
            "",
            "secret",
            "https://rc.esewa.com.np",
            "https://a.example/ok",
            "https://a.example/no"
        )
        .is_err());
        assert!(matches!(
            GatewayConfig::new("EPAYTEST", "s", "not a url", "https://a.example", "https://a.example"),
            Err(GatewayError::InvalidConfig(_))
        ));
        assert!(sample().timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("8gBm"));
        assert!(debug.contains("<redacted>"));
    }
}
