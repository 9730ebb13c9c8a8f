//! Fixtures shared by the service and route tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::PaymentPolicy;
use crate::services::notification_service::BroadcastNotifier;
use crate::services::order_service::OrderService;
use crate::services::payment_service::PaymentService;
use doko_core::pricing::{build_line_item, compute_totals};
use doko_core::{
    Order, OrderStatus, PaymentInfo, PaymentMethod, Product, ShippingAddress, ShippingPolicy,
    Transaction,
};
use doko_db::{Database, DbConfig};
use doko_gateway::{
    CallbackData, GatewayError, GatewayPayload, GatewayRegistry, GatewayResult,
    GatewayVerification, InitiationRequest, PaymentAction, PaymentGateway,
};

/// Flat Rs. 50 shipping, as the tests assume.
pub const TEST_SHIPPING: ShippingPolicy = ShippingPolicy::flat(doko_core::Money::from_rupees(50));

/// What the mock gateway answers on verify.
#[derive(Debug, Clone)]
pub enum MockAnswer {
    Complete,
    Pending,
    Fail(&'static str),
    Down,
}

/// A scripted gateway. The callback carries the reference under `ref`.
pub struct MockGateway {
    method: PaymentMethod,
    answer: Mutex<MockAnswer>,
    verify_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(method: PaymentMethod) -> Arc<Self> {
        Arc::new(MockGateway {
            method,
            answer: Mutex::new(MockAnswer::Complete),
            verify_calls: AtomicUsize::new(0),
        })
    }

    pub fn answer(&self, answer: MockAnswer) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, request: &InitiationRequest) -> GatewayResult<GatewayPayload> {
        if matches!(*self.answer.lock().unwrap(), MockAnswer::Down) {
            return Err(GatewayError::Unavailable {
                gateway: "mock",
                message: "connection refused".into(),
            });
        }
        Ok(GatewayPayload {
            method: self.method,
            action: PaymentAction::Redirect {
                url: format!("https://pay.example/{}", request.reference),
            },
            metadata: serde_json::json!({ "pidx": format!("pidx-{}", request.reference) }),
        })
    }

    fn reference_from_callback(&self, callback: &CallbackData) -> GatewayResult<String> {
        callback
            .get("ref")
            .cloned()
            .ok_or_else(|| GatewayError::InvalidCallback("missing ref".into()))
    }

    async fn verify(
        &self,
        _transaction: &Transaction,
        _callback: Option<&CallbackData>,
    ) -> GatewayResult<GatewayVerification> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.lock().unwrap().clone();
        let raw = serde_json::json!({ "mock": true });
        match answer {
            MockAnswer::Complete => Ok(GatewayVerification::completed("COMPLETE", raw)),
            MockAnswer::Pending => Ok(GatewayVerification::pending("PENDING", raw)),
            MockAnswer::Fail(code) => Ok(GatewayVerification::failed(code, code, "declined", raw)),
            MockAnswer::Down => Err(GatewayError::Timeout {
                gateway: "mock",
                after: std::time::Duration::from_secs(1),
            }),
        }
    }
}

pub fn callback(reference: &str) -> CallbackData {
    CallbackData::from([("ref".to_string(), reference.to_string())])
}

/// Everything a service test needs, wired like `main` does.
pub struct Harness {
    pub db: Database,
    pub esewa: Arc<MockGateway>,
    pub notifier: Arc<BroadcastNotifier>,
    pub payments: Arc<PaymentService>,
    pub orders: Arc<OrderService>,
}

pub async fn harness() -> Harness {
    harness_with(Database::new(DbConfig::in_memory()).await.unwrap()).await
}

pub async fn harness_with(db: Database) -> Harness {
    let esewa = MockGateway::new(PaymentMethod::Esewa);
    let registry = GatewayRegistry::from_configs(None, None)
        .unwrap()
        .with(esewa.clone());
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        registry,
        PaymentPolicy::default(),
        notifier.clone(),
    ));
    let orders = Arc::new(OrderService::new(
        db.clone(),
        TEST_SHIPPING,
        payments.clone(),
        notifier.clone(),
    ));
    Harness {
        db,
        esewa,
        notifier,
        payments,
        orders,
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        recipient_name: "Sita Sharma".to_string(),
        phone: "9841234567".to_string(),
        address: "Baneshwor-10".to_string(),
        city: Some("Kathmandu".to_string()),
    }
}

pub async fn listed_product(db: &Database, seller_id: &str, price_paisa: i64, stock: i64) -> Product {
    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4().to_string(),
        seller_id: seller_id.to_string(),
        name: "Organic Tomatoes".to_string(),
        description: None,
        unit: "kg".to_string(),
        price_paisa,
        stock_quantity: stock,
        is_available: stock > 0,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    db.products().insert(&product).await.unwrap()
}

/// Stores an order directly, bypassing the order service.
pub async fn placed_order(
    db: &Database,
    buyer_id: &str,
    product: &Product,
    quantity: i64,
    method: PaymentMethod,
) -> Order {
    let items = vec![build_line_item(product, quantity).unwrap()];
    let totals = compute_totals(&items, &TEST_SHIPPING).unwrap();
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4().to_string(),
        buyer_id: buyer_id.to_string(),
        items,
        totals,
        shipping_address: address(),
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
    };
    db.orders().create_with_reservation(&order, None).await.unwrap();
    order
}

/// Application state with default configuration and a mock eSewa.
pub async fn test_state() -> (crate::AppState, Arc<MockGateway>) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let esewa = MockGateway::new(PaymentMethod::Esewa);
    let registry = GatewayRegistry::from_configs(None, None)
        .unwrap()
        .with(esewa.clone());
    let config = crate::ApiConfig::from_lookup(|_| None).unwrap();
    (crate::AppState::new(db, registry, &config), esewa)
}
