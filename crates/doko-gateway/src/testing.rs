//! Fixtures for adapter tests: a throwaway local HTTP server standing in
//! for the gateway, and sample transactions.

use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use doko_core::{PaymentMethod, Transaction, TransactionStatus};

pub const TEST_SECRET: &str = "8gBm/:&EnhH.1/q";

/// Serves `router` on an ephemeral port; returns its base URL.
pub async fn spawn_mock(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn config_for(base_url: &str) -> GatewayConfig {
    GatewayConfig::new(
        "EPAYTEST",
        TEST_SECRET,
        base_url,
        "https://doko.example/payments/success",
        "https://doko.example/payments/failure",
    )
    .unwrap()
    .form_url("https://rc-epay.esewa.com.np/api/epay/main/v2/form")
    .unwrap()
}

pub fn transaction(method: PaymentMethod, reference: &str, amount_paisa: i64) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: format!("txn-{}", reference),
        order_id: "order-1".to_string(),
        buyer_id: "buyer-1".to_string(),
        method,
        reference: reference.to_string(),
        amount_paisa,
        refunded_paisa: 0,
        status: TransactionStatus::Initiated,
        gateway_metadata: serde_json::json!({}),
        failure_code: None,
        failure_message: None,
        last_error: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
        refunds: Vec::new(),
    }
}
