//! API server configuration.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults. Parsing goes through [`ApiConfig::from_lookup`] so it can be
//! tested without touching the process environment.
//!
//! ## Variables
//! ```text
//! ┌───────────────────────────────┬─────────────────────────────────────────┐
//! │ HTTP_PORT                     │ 8080                                    │
//! │ DATABASE_PATH                 │ ./doko.db                               │
//! │ PUBLIC_BASE_URL               │ http://localhost:8080                   │
//! │ JWT_SECRET                    │ dev secret (warns at startup)           │
//! │ JWT_LIFETIME_SECS             │ 3600                                    │
//! │ ESEWA_SECRET_KEY              │ unset → eSewa disabled                  │
//! │ ESEWA_MERCHANT_CODE           │ EPAYTEST                                │
//! │ ESEWA_BASE_URL/ESEWA_FORM_URL │ sandbox                                 │
//! │ KHALTI_SECRET_KEY             │ unset → Khalti disabled                 │
//! │ KHALTI_BASE_URL               │ sandbox                                 │
//! │ PAYMENT_FAILURE_URL           │ {PUBLIC_BASE_URL}/checkout/failed       │
//! │ GATEWAY_TIMEOUT_SECS          │ 15                                      │
//! │ REFUND_WINDOW_DAYS            │ 30                                      │
//! │ SHIPPING_FLAT_FEE_PAISA       │ 5000                                    │
//! │ SHIPPING_FREE_ABOVE_PAISA     │ unset → always charged                  │
//! │ RECONCILE_INTERVAL_SECS       │ 300                                     │
//! │ RECONCILE_AFTER_SECS          │ 900                                     │
//! └───────────────────────────────┴─────────────────────────────────────────┘
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use doko_core::{Money, RefundPolicy, ShippingPolicy, DEFAULT_REFUND_WINDOW_DAYS};
use doko_gateway::config::{
    DEFAULT_TIMEOUT_SECS, ESEWA_SANDBOX_BASE_URL, ESEWA_SANDBOX_FORM_URL, ESEWA_SANDBOX_MERCHANT,
    KHALTI_SANDBOX_BASE_URL,
};
use doko_gateway::{GatewayConfig, GatewayError};

/// Development-only JWT secret. Production deployments set `JWT_SECRET`.
pub const DEV_JWT_SECRET: &str = "doko-dev-secret-change-in-production";

/// Payment behaviour knobs handed to the payment service.
#[derive(Debug, Clone, Copy)]
pub struct PaymentPolicy {
    pub refund: RefundPolicy,
    /// How often the reconciler wakes up.
    pub reconcile_interval: Duration,
    /// How old an open digital transaction must be before it is re-verified.
    pub reconcile_after: Duration,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        PaymentPolicy {
            refund: RefundPolicy::default(),
            reconcile_interval: Duration::from_secs(300),
            reconcile_after: Duration::from_secs(900),
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub http_port: u16,
    pub database_path: String,
    /// Externally reachable origin, used to build gateway redirect URLs.
    pub public_base_url: String,
    pub jwt_secret: String,
    pub jwt_lifetime_secs: i64,
    pub esewa: Option<GatewayConfig>,
    pub khalti: Option<GatewayConfig>,
    pub payment: PaymentPolicy,
    pub shipping: ShippingPolicy,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let public_base_url = get("PUBLIC_BASE_URL", "http://localhost:8080")
            .trim_end_matches('/')
            .to_string();
        let gateway_timeout = Duration::from_secs(parse(
            "GATEWAY_TIMEOUT_SECS",
            &get("GATEWAY_TIMEOUT_SECS", &DEFAULT_TIMEOUT_SECS.to_string()),
        )?);
        let failure_url = get(
            "PAYMENT_FAILURE_URL",
            &format!("{}/checkout/failed", public_base_url),
        );

        let esewa = match lookup("ESEWA_SECRET_KEY") {
            Some(secret) => Some(
                GatewayConfig::new(
                    get("ESEWA_MERCHANT_CODE", ESEWA_SANDBOX_MERCHANT),
                    secret,
                    &get("ESEWA_BASE_URL", ESEWA_SANDBOX_BASE_URL),
                    &format!("{}/payments/esewa/verify", public_base_url),
                    &failure_url,
                )
                .and_then(|c| c.form_url(&get("ESEWA_FORM_URL", ESEWA_SANDBOX_FORM_URL)))
                .map_err(|e| ConfigError::gateway("ESEWA", e))?
                .timeout(gateway_timeout),
            ),
            None => None,
        };

        let khalti = match lookup("KHALTI_SECRET_KEY") {
            Some(secret) => Some(
                GatewayConfig::new(
                    get("KHALTI_MERCHANT_CODE", "DOKO"),
                    secret,
                    &get("KHALTI_BASE_URL", KHALTI_SANDBOX_BASE_URL),
                    &format!("{}/payments/khalti/verify", public_base_url),
                    &failure_url,
                )
                .map_err(|e| ConfigError::gateway("KHALTI", e))?
                .timeout(gateway_timeout),
            ),
            None => None,
        };

        let refund_days: i64 = parse(
            "REFUND_WINDOW_DAYS",
            &get("REFUND_WINDOW_DAYS", &DEFAULT_REFUND_WINDOW_DAYS.to_string()),
        )?;
        if refund_days < 0 {
            return Err(ConfigError::invalid("REFUND_WINDOW_DAYS", "must not be negative"));
        }

        let flat_fee: i64 = parse(
            "SHIPPING_FLAT_FEE_PAISA",
            &get(
                "SHIPPING_FLAT_FEE_PAISA",
                &doko_core::DEFAULT_SHIPPING_FEE_PAISA.to_string(),
            ),
        )?;
        if flat_fee < 0 {
            return Err(ConfigError::invalid("SHIPPING_FLAT_FEE_PAISA", "must not be negative"));
        }
        let mut shipping = ShippingPolicy::flat(Money::from_paisa(flat_fee));
        if let Some(raw) = lookup("SHIPPING_FREE_ABOVE_PAISA") {
            let threshold: i64 = parse("SHIPPING_FREE_ABOVE_PAISA", &raw)?;
            shipping = shipping.with_free_above(Money::from_paisa(threshold));
        }

        let config = ApiConfig {
            http_port: parse("HTTP_PORT", &get("HTTP_PORT", "8080"))?,
            database_path: get("DATABASE_PATH", "./doko.db"),
            public_base_url,
            jwt_secret: get("JWT_SECRET", DEV_JWT_SECRET),
            jwt_lifetime_secs: parse("JWT_LIFETIME_SECS", &get("JWT_LIFETIME_SECS", "3600"))?,
            esewa,
            khalti,
            payment: PaymentPolicy {
                refund: RefundPolicy::with_window_days(refund_days),
                reconcile_interval: Duration::from_secs(parse(
                    "RECONCILE_INTERVAL_SECS",
                    &get("RECONCILE_INTERVAL_SECS", "300"),
                )?),
                reconcile_after: Duration::from_secs(parse(
                    "RECONCILE_AFTER_SECS",
                    &get("RECONCILE_AFTER_SECS", "900"),
                )?),
            },
            shipping,
        };

        if config.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()));
        }
        if config.payment.reconcile_interval.is_zero() {
            return Err(ConfigError::invalid("RECONCILE_INTERVAL_SECS", "must be positive"));
        }

        Ok(config)
    }

    /// True when the built-in development JWT secret is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw)))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid {prefix} gateway configuration: {source}")]
    Gateway {
        prefix: String,
        #[source]
        source: GatewayError,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    fn gateway(prefix: &str, source: GatewayError) -> Self {
        ConfigError::Gateway {
            prefix: prefix.to_string(),
            source,
        }
    }
}
