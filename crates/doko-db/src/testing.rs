//! Fixtures shared by the repository tests.

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{Database, DbConfig};
use doko_core::pricing::{build_line_item, compute_totals};
use doko_core::{
    Order, OrderStatus, PaymentInfo, PaymentMethod, Product, ShippingAddress, ShippingPolicy,
    Transaction, TransactionStatus,
};

pub async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

/// A file-backed database with a real pool, for concurrency tests.
pub async fn file_db() -> (Database, PathBuf) {
    let path = std::env::temp_dir().join(format!("doko-test-{}.db", Uuid::new_v4()));
    let db = Database::new(DbConfig::new(&path).max_connections(8))
        .await
        .unwrap();
    (db, path)
}

pub fn remove_db_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

pub fn sample_product(seller_id: &str, price_paisa: i64, stock: i64) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4().to_string(),
        seller_id: seller_id.to_string(),
        name: "Organic Tomatoes".to_string(),
        description: Some("Picked this morning in Dhading".to_string()),
        unit: "kg".to_string(),
        price_paisa,
        stock_quantity: stock,
        is_available: stock > 0,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_order(buyer_id: &str, lines: &[(&Product, i64)], method: PaymentMethod) -> Order {
    let items: Vec<_> = lines
        .iter()
        .map(|(product, qty)| build_line_item(product, *qty).unwrap())
        .collect();
    let totals = compute_totals(&items, &ShippingPolicy::default()).unwrap();
    let now = Utc::now();

    Order {
        id: Uuid::new_v4().to_string(),
        buyer_id: buyer_id.to_string(),
        items,
        totals,
        shipping_address: ShippingAddress {
            recipient_name: "Sita Sharma".to_string(),
            phone: "9841234567".to_string(),
            address: "Baneshwor-10".to_string(),
            city: Some("Kathmandu".to_string()),
        },
        payment: PaymentInfo {
            method,
            status: method.initial_payment_status(),
        },
        status: OrderStatus::Created,
        transporter_id: None,
        created_at: now,
        updated_at: now,
        cancelled_at: None,
        delivered_at: None,
    }
}

pub fn sample_transaction(order: &Order, status: TransactionStatus) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4().to_string(),
        order_id: order.id.clone(),
        buyer_id: order.buyer_id.clone(),
        method: order.payment.method,
        reference: Uuid::new_v4().to_string(),
        amount_paisa: order.totals.grand_total.paisa(),
        refunded_paisa: 0,
        status,
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
