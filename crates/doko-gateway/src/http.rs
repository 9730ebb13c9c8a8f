//! Shared reqwest plumbing for the HTTP adapters.

use reqwest::{Client, Response};
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};

/// Builds a client whose every request is bounded by `config.timeout`.
pub(crate) fn client_for(config: &GatewayConfig) -> GatewayResult<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| GatewayError::InvalidConfig(e.to_string()))
}

/// Reads a JSON body, classifying non-success statuses.
///
/// 5xx is `Unavailable` (retryable); 4xx is `Rejected` with the body text.
pub(crate) async fn read_json(
    gateway: &'static str,
    timeout: Duration,
    response: Response,
) -> GatewayResult<serde_json::Value> {
    let status = response.status();

    if status.is_server_error() {
        return Err(GatewayError::Unavailable {
            gateway,
            message: format!("HTTP {}", status.as_u16()),
        });
    }

    if status.is_client_error() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        return Err(GatewayError::Rejected {
            gateway,
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| GatewayError::from_http(gateway, timeout, e))
}

/// Renders a JSON scalar the way it appears in a signed message.
pub(crate) fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
