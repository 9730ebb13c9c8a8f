//! # Order Service
//!
//! Checkout, fulfilment and cancellation. Stock is reserved in the same
//! database transaction that stores the order, and returned exactly once
//! when the order is cancelled.
//!
//! ## Order Lifecycle
//! ```text
//!   created ──► confirmed ──► dispatched ──► delivered
//!      │            │              │             └─ COD settled here
//!      └────────────┴──────────────┴──► cancelled
//!                                        ├─ paid? refund first
//!                                        ├─ open attempts closed
//!                                        └─ stock restored
//! ```

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::services::notification_service::{Notification, Notifier};
use crate::services::payment_service::{new_transaction, PaymentService};
use doko_core::lifecycle::ensure_order_transition;
use doko_core::policy::{authorize_assign_transporter, authorize_transition};
use doko_core::pricing::{build_line_item, compute_totals};
use doko_core::validation::{validate_line_requests, validate_shipping_address};
use doko_core::{
    Actor, Capability, CoreError, LineRequest, Order, OrderStatus, PaymentInfo, PaymentMethod,
    Role, ShippingAddress, ShippingPolicy,
};
use doko_db::{Database, DbError};

/// Orders returned to an admin in one listing.
const ADMIN_LIST_LIMIT: u32 = 200;

/// Checkout request body.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub items: Vec<LineRequest>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

pub struct OrderService {
    db: Database,
    shipping: ShippingPolicy,
    payments: Arc<PaymentService>,
    notifier: Arc<dyn Notifier>,
}

impl OrderService {
    pub fn new(
        db: Database,
        shipping: ShippingPolicy,
        payments: Arc<PaymentService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        OrderService {
            db,
            shipping,
            payments,
            notifier,
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Validates the cart, snapshots prices and reserves stock.
    #[instrument(skip(self, actor, input), fields(buyer_id = %actor.user_id, lines = input.items.len()))]
    pub async fn create(&self, actor: &Actor, input: NewOrder) -> ServiceResult<Order> {
        actor.require(Capability::PlaceOrder)?;
        validate_line_requests(&input.items)?;
        validate_shipping_address(&input.shipping_address)?;

        let mut items = Vec::with_capacity(input.items.len());
        for line in &input.items {
            let product = self
                .db
                .products()
                .get_by_id(&line.product_id)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| CoreError::unavailable(&line.product_id, "not listed"))?;

            if product.seller_id == actor.user_id {
                return Err(CoreError::SelfPurchase {
                    product_id: product.id.clone(),
                }
                .into());
            }
            if !product.can_fulfil(line.quantity) {
                return Err(CoreError::unavailable(
                    &product.id,
                    format!("only {} {} left", product.stock_quantity, product.unit),
                )
                .into());
            }

            items.push(build_line_item(&product, line.quantity)?);
        }

        let totals = compute_totals(&items, &self.shipping)?;
        let method = input.payment_method;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            buyer_id: actor.user_id.clone(),
            items,
            totals,
            shipping_address: trimmed(input.shipping_address),
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

        // Cash on delivery starts with its pending attempt, stored with the order.
        let cash = (method == PaymentMethod::CashOnDelivery).then(|| new_transaction(&order, method));

        match self.db.orders().create_with_reservation(&order, cash.as_ref()).await {
            Ok(()) => {}
            Err(DbError::StockConflict { product_id }) => {
                return Err(CoreError::unavailable(product_id, "sold out while ordering").into());
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            order_id = %order.id,
            grand_total = %order.totals.grand_total,
            %method,
            "Order placed"
        );
        self.notifier.notify(Notification::OrderPlaced {
            order_id: order.id.clone(),
            buyer_id: order.buyer_id.clone(),
            grand_total: order.totals.grand_total,
        });

        Ok(order)
    }

    // =========================================================================
    // Fulfilment
    // =========================================================================

    /// Moves the order to `target`, refunding first when a paid order is
    /// cancelled.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn update_status(
        &self,
        order_id: &str,
        actor: &Actor,
        target: OrderStatus,
    ) -> ServiceResult<Order> {
        let order = self.load(order_id).await?;
        ensure_order_transition(order.status, target)?;
        authorize_transition(actor, &order, target)?;

        if target == OrderStatus::Cancelled {
            self.cancel(&order, actor).await?;
        } else {
            if !self
                .db
                .orders()
                .advance_status(&order.id, order.status, target)
                .await?
            {
                let current = self.load(order_id).await?;
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: target,
                }
                .into());
            }

            if target == OrderStatus::Delivered
                && order.payment.method == PaymentMethod::CashOnDelivery
                && self.db.transactions().settle_cash_on_delivery(&order.id).await?
            {
                info!(order_id = %order.id, "Cash collected on delivery");
            }
        }

        info!(order_id = %order.id, from = %order.status, to = %target, "Order status changed");
        self.notifier.notify(Notification::OrderStatusChanged {
            order_id: order.id.clone(),
            status: target,
        });

        self.load(order_id).await
    }

    async fn cancel(&self, order: &Order, actor: &Actor) -> ServiceResult<()> {
        self.payments.refund_for_cancellation(order, actor).await?;

        // A full refund may already have cancelled and restocked the order.
        if !self.db.orders().cancel_and_restock(&order.id).await? {
            let current = self.load(&order.id).await?;
            if current.status != OrderStatus::Cancelled {
                return Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: OrderStatus::Cancelled,
                }
                .into());
            }
        }

        // A payment confirmed between the refund and the cancellation.
        let late = self.payments.refund_for_cancellation(order, actor).await?;
        if late > 0 {
            warn!(order_id = %order.id, late, "Refunded payments confirmed during cancellation");
        }
        Ok(())
    }

    /// Hands the order to a transporter before it leaves the farm.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn assign_transporter(
        &self,
        order_id: &str,
        actor: &Actor,
        transporter_id: &str,
    ) -> ServiceResult<Order> {
        let transporter_id = transporter_id.trim();
        if transporter_id.is_empty() {
            return Err(doko_core::ValidationError::Required {
                field: "transporter_id".into(),
            }
            .into());
        }

        let order = self.load(order_id).await?;
        authorize_assign_transporter(actor, &order)?;

        if !self
            .db
            .orders()
            .assign_transporter(&order.id, transporter_id)
            .await?
        {
            warn!(order_id = %order.id, status = %order.status, "Transporter assignment refused");
            return Err(CoreError::AlreadyDispatched {
                order_id: order.id.clone(),
            }
            .into());
        }

        info!(order_id = %order.id, %transporter_id, "Transporter assigned");
        self.load(order_id).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, order_id: &str, actor: &Actor) -> ServiceResult<Order> {
        let order = self.load(order_id).await?;
        if !actor.can_view(&order) {
            return Err(CoreError::not_authorized("not a party to this order").into());
        }
        Ok(order)
    }

    /// The orders this actor is a party to, newest first.
    pub async fn list_mine(&self, actor: &Actor) -> ServiceResult<Vec<Order>> {
        let orders = self.db.orders();
        let uid = actor.user_id.as_str();

        let list = match actor.role {
            Role::Buyer => orders.list_for_buyer(uid).await?,
            Role::Transporter => orders.list_for_transporter(uid).await?,
            Role::Admin => orders.list_all(ADMIN_LIST_LIMIT).await?,
            Role::Farmer => {
                // Farmers buy too.
                let mut seen = HashSet::new();
                let mut merged: Vec<Order> = orders
                    .list_for_seller(uid)
                    .await?
                    .into_iter()
                    .chain(orders.list_for_buyer(uid).await?)
                    .filter(|o| seen.insert(o.id.clone()))
                    .collect();
                merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                merged
            }
        };
        Ok(list)
    }

    async fn load(&self, id: &str) -> ServiceResult<Order> {
        self.db
            .orders()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::from(CoreError::OrderNotFound(id.to_string())))
    }
}

fn trimmed(address: ShippingAddress) -> ShippingAddress {
    ShippingAddress {
        recipient_name: address.recipient_name.trim().to_string(),
        phone: address.phone.trim().to_string(),
        address: address.address.trim().to_string(),
        city: address
            .city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address, callback, harness, harness_with, listed_product};
    use doko_core::{Money, PaymentStatus, TransactionStatus, ORDER_CANCELLED};

    fn buyer() -> Actor {
        Actor::new("buyer-1", Role::Buyer)
    }

    fn farmer() -> Actor {
        Actor::new("farmer-1", Role::Farmer)
    }

    fn admin() -> Actor {
        Actor::new("admin-1", Role::Admin)
    }

    fn cart(product_id: &str, quantity: i64, method: PaymentMethod) -> NewOrder {
        NewOrder {
            items: vec![LineRequest {
                product_id: product_id.to_string(),
                quantity,
            }],
            shipping_address: address(),
            payment_method: method,
        }
    }

    #[tokio::test]
    async fn test_create_order_reserves_stock_and_prices_snapshot() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 10).await;
        let mut events = h.notifier.subscribe();

        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 3, PaymentMethod::Esewa))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.payment.status, PaymentStatus::Initiated);
        assert_eq!(order.totals.subtotal, Money::from_rupees(240));
        assert_eq!(order.totals.grand_total, Money::from_rupees(290));
        assert_eq!(order.items[0].seller_id, "farmer-1");

        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 7);

        assert!(matches!(
            events.recv().await.unwrap(),
            Notification::OrderPlaced { .. }
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_carts_without_side_effects() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 2).await;

        assert!(matches!(
            h.orders.create(&buyer(), cart(&product.id, 3, PaymentMethod::Esewa)).await,
            Err(ServiceError::Core(CoreError::ProductUnavailable { .. }))
        ));
        assert!(matches!(
            h.orders.create(&buyer(), cart("missing", 1, PaymentMethod::Esewa)).await,
            Err(ServiceError::Core(CoreError::ProductUnavailable { .. }))
        ));
        assert!(matches!(
            h.orders.create(&farmer(), cart(&product.id, 1, PaymentMethod::Esewa)).await,
            Err(ServiceError::Core(CoreError::SelfPurchase { .. }))
        ));

        let mut empty = cart(&product.id, 1, PaymentMethod::Esewa);
        empty.items.clear();
        assert!(matches!(
            h.orders.create(&buyer(), empty).await,
            Err(ServiceError::Core(CoreError::Validation(_)))
        ));

        let mut bad_phone = cart(&product.id, 1, PaymentMethod::Esewa);
        bad_phone.shipping_address.phone = "12".into();
        assert!(matches!(
            h.orders.create(&buyer(), bad_phone).await,
            Err(ServiceError::Core(CoreError::Validation(_)))
        ));

        assert!(matches!(
            h.orders
                .create(&Actor::new("t-1", Role::Transporter), cart(&product.id, 1, PaymentMethod::Esewa))
                .await,
            Err(ServiceError::Core(CoreError::NotAuthorized { .. }))
        ));

        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 2);
        assert!(h.orders.list_mine(&buyer()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_roles() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 1, PaymentMethod::Esewa))
            .await
            .unwrap();

        assert!(matches!(
            h.orders.update_status(&order.id, &buyer(), OrderStatus::Confirmed).await,
            Err(ServiceError::Core(CoreError::NotAuthorized { .. }))
        ));
        assert!(matches!(
            h.orders.update_status(&order.id, &farmer(), OrderStatus::Delivered).await,
            Err(ServiceError::Core(CoreError::InvalidTransition { .. }))
        ));

        let confirmed = h
            .orders
            .update_status(&order.id, &farmer(), OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        // Buyers may only cancel before the farmer accepts.
        assert!(matches!(
            h.orders.update_status(&order.id, &buyer(), OrderStatus::Cancelled).await,
            Err(ServiceError::Core(CoreError::NotAuthorized { .. }))
        ));

        let with_transport = h
            .orders
            .assign_transporter(&order.id, &farmer(), "transporter-1")
            .await
            .unwrap();
        assert_eq!(with_transport.transporter_id.as_deref(), Some("transporter-1"));

        let transporter = Actor::new("transporter-1", Role::Transporter);
        h.orders
            .update_status(&order.id, &transporter, OrderStatus::Dispatched)
            .await
            .unwrap();
        assert!(matches!(
            h.orders.assign_transporter(&order.id, &farmer(), "transporter-2").await,
            Err(ServiceError::Core(CoreError::AlreadyDispatched { .. }))
        ));

        let delivered = h
            .orders
            .update_status(&order.id, &transporter, OrderStatus::Delivered)
            .await
            .unwrap();
        assert!(delivered.delivered_at.is_some());

        assert!(matches!(
            h.orders.update_status(&order.id, &admin(), OrderStatus::Cancelled).await,
            Err(ServiceError::Core(CoreError::InvalidTransition { .. }))
        ));

        assert_eq!(h.orders.list_mine(&transporter).await.unwrap().len(), 1);
        assert_eq!(h.orders.list_mine(&farmer()).await.unwrap().len(), 1);
        assert_eq!(h.orders.list_mine(&admin()).await.unwrap().len(), 1);
        assert!(matches!(
            h.orders.get(&order.id, &Actor::new("buyer-2", Role::Buyer)).await,
            Err(ServiceError::Core(CoreError::NotAuthorized { .. }))
        ));
    }

    #[tokio::test]
    async fn test_buyer_cancel_restores_stock_once() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 4, PaymentMethod::Esewa))
            .await
            .unwrap();

        let cancelled = h
            .orders
            .update_status(&order.id, &buyer(), OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        assert!(matches!(
            h.orders.update_status(&order.id, &buyer(), OrderStatus::Cancelled).await,
            Err(ServiceError::Core(CoreError::InvalidTransition { .. }))
        ));

        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_cancelling_paid_order_refunds_first() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 50_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 1, PaymentMethod::Esewa))
            .await
            .unwrap();

        let started = h
            .payments
            .initiate(&order.id, &buyer(), PaymentMethod::Esewa)
            .await
            .unwrap();
        h.payments
            .verify(PaymentMethod::Esewa, &callback(&started.transaction.reference))
            .await
            .unwrap();
        h.orders
            .update_status(&order.id, &farmer(), OrderStatus::Confirmed)
            .await
            .unwrap();

        let cancelled = h
            .orders
            .update_status(&order.id, &farmer(), OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.payment.status, PaymentStatus::Refunded);

        let txn = h
            .db
            .transactions()
            .get_by_id(&started.transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.status, TransactionStatus::Refunded);
        assert_eq!(txn.refunded(), Money::from_rupees(550));
        assert_eq!(txn.refunds[0].actor_id, "farmer-1");

        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_payment_confirmed_after_cancel_is_refunded() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 50_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 1, PaymentMethod::Esewa))
            .await
            .unwrap();
        let started = h
            .payments
            .initiate(&order.id, &buyer(), PaymentMethod::Esewa)
            .await
            .unwrap();

        h.orders
            .update_status(&order.id, &buyer(), OrderStatus::Cancelled)
            .await
            .unwrap();
        let closed = h
            .db
            .transactions()
            .get_by_id(&started.transaction.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, TransactionStatus::Failed);
        assert_eq!(closed.failure_code.as_deref(), Some(ORDER_CANCELLED));

        // The buyer finished paying on the eSewa page anyway.
        let late = h
            .payments
            .verify(PaymentMethod::Esewa, &callback(&started.transaction.reference))
            .await
            .unwrap();
        assert_eq!(late.status, TransactionStatus::Refunded);
        assert_eq!(late.refunded(), Money::from_rupees(550));

        let order = h.db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment.status, PaymentStatus::Refunded);
        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_cancelled_cash_order_cannot_settle() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 1, PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        h.orders
            .update_status(&order.id, &buyer(), OrderStatus::Cancelled)
            .await
            .unwrap();

        let txns = h.db.transactions().list_for_order(&order.id).await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].status, TransactionStatus::Failed);
        assert_eq!(txns[0].failure_code.as_deref(), Some(ORDER_CANCELLED));
        assert!(!h.db.transactions().settle_cash_on_delivery(&order.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cash_on_delivery_settles_on_delivery() {
        let h = harness().await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 10).await;
        let order = h
            .orders
            .create(&buyer(), cart(&product.id, 1, PaymentMethod::CashOnDelivery))
            .await
            .unwrap();
        assert_eq!(order.payment.status, PaymentStatus::Pending);

        let txns = h.db.transactions().list_for_order(&order.id).await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].status, TransactionStatus::Pending);

        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Dispatched,
            OrderStatus::Delivered,
        ] {
            h.orders.update_status(&order.id, &admin(), status).await.unwrap();
        }

        let order = h.orders.get(&order.id, &buyer()).await.unwrap();
        assert_eq!(order.payment.status, PaymentStatus::Paid);
        let txn = h.db.transactions().get_by_id(&txns[0].id).await.unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_oversell() {
        let path = std::env::temp_dir().join(format!("doko-api-{}.db", Uuid::new_v4()));
        let db = Database::new(doko_db::DbConfig::new(&path).max_connections(8))
            .await
            .unwrap();
        let h = harness_with(db).await;
        let product = listed_product(&h.db, "farmer-1", 8_000, 5).await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let orders = h.orders.clone();
            let input = cart(&product.id, 1, PaymentMethod::Esewa);
            handles.push(tokio::spawn(async move {
                orders
                    .create(&Actor::new(format!("buyer-{i}"), Role::Buyer), input)
                    .await
            }));
        }

        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(ServiceError::Core(CoreError::ProductUnavailable { .. })) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(placed, 5);

        let product = h.db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 0);

        h.db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
