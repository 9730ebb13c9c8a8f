//! # Order Repository
//!
//! Database operations for orders and their line items.
//!
//! ## Order Placement Unit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │    for each line:  try_reserve(product, qty)  ── 0 rows? ──► ROLLBACK   │
//! │    INSERT orders                                     (StockConflict)    │
//! │    INSERT order_items (snapshots)                                       │
//! │    INSERT transactions (cash on delivery only)                          │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Either every line is reserved and the order exists, or nothing        │
//! │  changed at all.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status changes are conditional on the status the caller last saw
//! (`WHERE status = :expected`), so two racing updates cannot both win.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::product::ProductRepository;
use crate::repository::transaction::{close_open_attempts, insert_transaction};
use doko_core::{
    LineItem, Money, Order, OrderStatus, OrderTotals, PaymentInfo, PaymentMethod, PaymentStatus,
    ShippingAddress, Transaction, ORDER_CANCELLED,
};

const ORDER_COLUMNS: &str = r#"
    o.id, o.buyer_id, o.subtotal_paisa, o.shipping_paisa, o.grand_total_paisa,
    o.recipient_name, o.phone, o.address, o.city,
    o.payment_method, o.payment_status, o.status, o.transporter_id,
    o.created_at, o.updated_at, o.cancelled_at, o.delivered_at
"#;

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    buyer_id: String,
    subtotal_paisa: i64,
    shipping_paisa: i64,
    grand_total_paisa: i64,
    recipient_name: String,
    phone: String,
    address: String,
    city: Option<String>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    status: OrderStatus,
    transporter_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    product_id: String,
    seller_id: String,
    name: String,
    quantity: i64,
    unit_price_paisa: i64,
    line_total_paisa: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<ItemRow>) -> Order {
        Order {
            id: self.id,
            buyer_id: self.buyer_id,
            items: items
                .into_iter()
                .map(|row| LineItem {
                    product_id: row.product_id,
                    seller_id: row.seller_id,
                    name: row.name,
                    quantity: row.quantity,
                    unit_price: Money::from_paisa(row.unit_price_paisa),
                    line_total: Money::from_paisa(row.line_total_paisa),
                })
                .collect(),
            totals: OrderTotals {
                subtotal: Money::from_paisa(self.subtotal_paisa),
                shipping: Money::from_paisa(self.shipping_paisa),
                grand_total: Money::from_paisa(self.grand_total_paisa),
            },
            shipping_address: ShippingAddress {
                recipient_name: self.recipient_name,
                phone: self.phone,
                address: self.address,
                city: self.city,
            },
            payment: PaymentInfo {
                method: self.payment_method,
                status: self.payment_status,
            },
            status: self.status,
            transporter_id: self.transporter_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            cancelled_at: self.cancelled_at,
            delivered_at: self.delivered_at,
        }
    }
}

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Reserves stock for every line and stores the order, as one unit.
    ///
    /// `payment` is the attempt opened together with the order (the
    /// pending cash-on-delivery transaction). If any write fails, nothing
    /// is stored.
    ///
    /// ## Errors
    /// - `StockConflict` naming the first line that could not be reserved
    pub async fn create_with_reservation(
        &self,
        order: &Order,
        payment: Option<&Transaction>,
    ) -> DbResult<()> {
        debug!(
            order_id = %order.id,
            buyer_id = %order.buyer_id,
            lines = order.items.len(),
            "Creating order with stock reservation"
        );

        let mut tx = self.pool.begin().await?;

        for item in &order.items {
            if !ProductRepository::try_reserve(&mut *tx, &item.product_id, item.quantity).await? {
                // Dropping `tx` rolls back the lines reserved so far.
                return Err(DbError::StockConflict {
                    product_id: item.product_id.clone(),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, buyer_id, subtotal_paisa, shipping_paisa, grand_total_paisa,
                recipient_name, phone, address, city,
                payment_method, payment_status, status, transporter_id,
                created_at, updated_at, cancelled_at, delivered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&order.id)
        .bind(&order.buyer_id)
        .bind(order.totals.subtotal.paisa())
        .bind(order.totals.shipping.paisa())
        .bind(order.totals.grand_total.paisa())
        .bind(&order.shipping_address.recipient_name)
        .bind(&order.shipping_address.phone)
        .bind(&order.shipping_address.address)
        .bind(&order.shipping_address.city)
        .bind(order.payment.method)
        .bind(order.payment.status)
        .bind(order.status)
        .bind(&order.transporter_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.cancelled_at)
        .bind(order.delivered_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, product_id, seller_id, name,
                    quantity, unit_price_paisa, line_total_paisa, position
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&order.id)
            .bind(&item.product_id)
            .bind(&item.seller_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price.paisa())
            .bind(item.line_total.paisa())
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(txn) = payment {
            insert_transaction(&mut *tx, txn).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Gets an order with its line items.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = ?1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut conn = self.pool.acquire().await?;
                let items = load_items(&mut conn, &row.id).await?;
                Ok(Some(row.into_order(items)))
            }
            None => Ok(None),
        }
    }

    /// Orders placed by a buyer, newest first.
    pub async fn list_for_buyer(&self, buyer_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.buyer_id = ?1 ORDER BY o.created_at DESC"
        );
        self.load_orders(&sql, Some(buyer_id)).await
    }

    /// Orders containing at least one of the seller's products.
    pub async fn list_for_seller(&self, seller_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o \
             WHERE EXISTS (SELECT 1 FROM order_items i WHERE i.order_id = o.id AND i.seller_id = ?1) \
             ORDER BY o.created_at DESC"
        );
        self.load_orders(&sql, Some(seller_id)).await
    }

    /// Orders a transporter is assigned to.
    pub async fn list_for_transporter(&self, transporter_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.transporter_id = ?1 ORDER BY o.created_at DESC"
        );
        self.load_orders(&sql, Some(transporter_id)).await
    }

    /// Every order (admin view), newest first.
    pub async fn list_all(&self, limit: u32) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o ORDER BY o.created_at DESC LIMIT {}",
            limit
        );
        self.load_orders(&sql, None).await
    }

    async fn load_orders(&self, sql: &str, param: Option<&str>) -> DbResult<Vec<Order>> {
        let mut query = sqlx::query_as::<_, OrderRow>(sql);
        if let Some(param) = param {
            query = query.bind(param.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut conn = self.pool.acquire().await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items = load_items(&mut conn, &row.id).await?;
            orders.push(row.into_order(items));
        }
        Ok(orders)
    }

    /// Moves an order from `from` to `to` if it is still in `from`.
    ///
    /// Returns `false` when another request changed the status first.
    /// Stamps `delivered_at` when moving to delivered.
    pub async fn advance_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let delivered_at = (to == OrderStatus::Delivered).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?3,
                updated_at = ?4,
                delivered_at = COALESCE(?5, delivered_at)
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(now)
        .bind(delivered_at)
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected() == 1;
        debug!(order_id = %id, %from, %to, changed, "Advance order status");
        Ok(changed)
    }

    /// Assigns a transporter while the order has not left the farm.
    pub async fn assign_transporter(&self, id: &str, transporter_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET transporter_id = ?2, updated_at = ?3
            WHERE id = ?1 AND status IN ('created', 'confirmed')
            "#,
        )
        .bind(id)
        .bind(transporter_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancels the order, returns every line's quantity to stock and
    /// closes its open payment attempts with `ORDER_CANCELLED`.
    ///
    /// Idempotent: if the order is already cancelled (or delivered) nothing
    /// changes and `false` is returned, so stock is restored exactly once.
    pub async fn cancel_and_restock(&self, id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = 'cancelled',
                payment_status = CASE
                    WHEN payment_status IN ('initiated', 'pending') THEN 'failed'
                    ELSE payment_status
                END,
                cancelled_at = ?2,
                updated_at = ?2
            WHERE id = ?1 AND status IN ('created', 'confirmed', 'dispatched')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            debug!(order_id = %id, "Order already closed, nothing to restock");
            return Ok(false);
        }

        let items = load_items(&mut *tx, id).await?;
        for item in &items {
            ProductRepository::release(&mut *tx, &item.product_id, item.quantity).await?;
        }

        let closed = close_open_attempts(&mut *tx, id, ORDER_CANCELLED, "order cancelled", now).await?;

        tx.commit().await?;
        debug!(order_id = %id, lines = items.len(), closed, "Order cancelled and stock restored");
        Ok(true)
    }

    /// Records the payment method and status for a new payment attempt.
    ///
    /// Conditional on the order being open and not yet paid; returns
    /// `false` otherwise.
    pub async fn set_payment(
        &self,
        id: &str,
        method: PaymentMethod,
        status: PaymentStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET payment_method = ?2, payment_status = ?3, updated_at = ?4
            WHERE id = ?1
              AND status <> 'cancelled'
              AND payment_status NOT IN ('paid', 'refunded')
            "#,
        )
        .bind(id)
        .bind(method)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

async fn load_items(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<ItemRow>> {
    let items = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT product_id, seller_id, name, quantity, unit_price_paisa, line_total_paisa
        FROM order_items
        WHERE order_id = ?1
        ORDER BY position
        "#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;

    Ok(items)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_db, memory_db, sample_order, sample_product, sample_transaction};
    use doko_core::TransactionStatus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_and_load_order() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 25_000, 10)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 2)], PaymentMethod::Esewa);

        db.orders().create_with_reservation(&order, None).await.unwrap();

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].line_total, Money::from_rupees(500));
        assert_eq!(loaded.totals.grand_total, Money::from_rupees(550));
        assert_eq!(loaded.status, OrderStatus::Created);
        assert_eq!(loaded.payment.status, PaymentStatus::Initiated);

        let stock = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 8);
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_whole_order() {
        let db = memory_db().await;
        let plenty = db.products().insert(&sample_product("farmer-1", 1_000, 10)).await.unwrap();
        let scarce = db.products().insert(&sample_product("farmer-2", 1_000, 1)).await.unwrap();
        let order = sample_order(
            "buyer-1",
            &[(&plenty, 4), (&scarce, 2)],
            PaymentMethod::CashOnDelivery,
        );

        let err = db.orders().create_with_reservation(&order, None).await.unwrap_err();
        assert!(matches!(err, DbError::StockConflict { ref product_id } if *product_id == scarce.id));

        // First line's reservation was rolled back too.
        let plenty_now = db.products().get_by_id(&plenty.id).await.unwrap().unwrap();
        assert_eq!(plenty_now.stock_quantity, 10);
        assert!(db.orders().get_by_id(&order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_two_orders_of_three_against_stock_of_five() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();

        let first = sample_order("buyer-1", &[(&product, 3)], PaymentMethod::Khalti);
        let second = sample_order("buyer-2", &[(&product, 3)], PaymentMethod::Khalti);

        db.orders().create_with_reservation(&first, None).await.unwrap();
        assert!(matches!(
            db.orders().create_with_reservation(&second, None).await,
            Err(DbError::StockConflict { .. })
        ));

        let stock = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 2);
    }

    #[tokio::test]
    async fn test_concurrent_orders_never_oversell() {
        let (db, path) = file_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let product = Arc::new(product);

        let mut handles = Vec::new();
        for n in 0..12 {
            let db = db.clone();
            let product = Arc::clone(&product);
            handles.push(tokio::spawn(async move {
                let order = sample_order(
                    &format!("buyer-{n}"),
                    &[(product.as_ref(), 1)],
                    PaymentMethod::CashOnDelivery,
                );
                db.orders().create_with_reservation(&order, None).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(DbError::StockConflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 5);
        let stock = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 0);
        assert!(!stock.is_available);

        db.close().await;
        crate::testing::remove_db_files(&path);
    }

    #[tokio::test]
    async fn test_advance_status_is_conditional() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 1)], PaymentMethod::Esewa);
        db.orders().create_with_reservation(&order, None).await.unwrap();

        let orders = db.orders();
        assert!(orders
            .advance_status(&order.id, OrderStatus::Created, OrderStatus::Confirmed)
            .await
            .unwrap());
        // Second caller saw the stale status.
        assert!(!orders
            .advance_status(&order.id, OrderStatus::Created, OrderStatus::Confirmed)
            .await
            .unwrap());

        orders
            .advance_status(&order.id, OrderStatus::Confirmed, OrderStatus::Dispatched)
            .await
            .unwrap();
        orders
            .advance_status(&order.id, OrderStatus::Dispatched, OrderStatus::Delivered)
            .await
            .unwrap();

        let loaded = orders.get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Delivered);
        assert!(loaded.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_restocks_exactly_once() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 3)], PaymentMethod::CashOnDelivery);
        db.orders().create_with_reservation(&order, None).await.unwrap();

        assert!(db.orders().cancel_and_restock(&order.id).await.unwrap());
        assert!(!db.orders().cancel_and_restock(&order.id).await.unwrap());

        let stock = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 5);

        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Cancelled);
        assert!(loaded.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn test_listing_views() {
        let db = memory_db().await;
        let tomatoes = db.products().insert(&sample_product("farmer-1", 1_000, 50)).await.unwrap();
        let onions = db.products().insert(&sample_product("farmer-2", 1_000, 50)).await.unwrap();

        let a = sample_order("buyer-1", &[(&tomatoes, 1)], PaymentMethod::Esewa);
        let b = sample_order("buyer-1", &[(&onions, 1)], PaymentMethod::Esewa);
        let c = sample_order("buyer-2", &[(&tomatoes, 1), (&onions, 1)], PaymentMethod::Esewa);
        for order in [&a, &b, &c] {
            db.orders().create_with_reservation(order, None).await.unwrap();
        }
        assert!(db.orders().assign_transporter(&c.id, "truck-1").await.unwrap());

        assert_eq!(db.orders().list_for_buyer("buyer-1").await.unwrap().len(), 2);
        assert_eq!(db.orders().list_for_seller("farmer-1").await.unwrap().len(), 2);
        assert_eq!(db.orders().list_for_seller("farmer-2").await.unwrap().len(), 2);
        assert_eq!(db.orders().list_for_transporter("truck-1").await.unwrap().len(), 1);
        assert_eq!(db.orders().list_all(100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_set_payment_refused_once_settled() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 1)], PaymentMethod::Esewa);
        db.orders().create_with_reservation(&order, None).await.unwrap();

        assert!(db
            .orders()
            .set_payment(&order.id, PaymentMethod::Khalti, PaymentStatus::Initiated)
            .await
            .unwrap());
        assert_eq!(
            db.orders().get_by_id(&order.id).await.unwrap().unwrap().payment.method,
            PaymentMethod::Khalti
        );

        db.orders().cancel_and_restock(&order.id).await.unwrap();
        assert!(!db
            .orders()
            .set_payment(&order.id, PaymentMethod::Esewa, PaymentStatus::Initiated)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_cash_on_delivery_attempt_stored_with_order() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 2)], PaymentMethod::CashOnDelivery);
        let cash = sample_transaction(&order, TransactionStatus::Pending);
        db.orders().create_with_reservation(&order, Some(&cash)).await.unwrap();
        assert_eq!(db.transactions().list_for_order(&order.id).await.unwrap().len(), 1);

        // Same transaction id again: the insert fails, so the whole order goes.
        let second = sample_order("buyer-2", &[(&product, 2)], PaymentMethod::CashOnDelivery);
        let mut clash = sample_transaction(&second, TransactionStatus::Pending);
        clash.id = cash.id.clone();
        assert!(db.orders().create_with_reservation(&second, Some(&clash)).await.is_err());

        assert!(db.orders().get_by_id(&second.id).await.unwrap().is_none());
        let stock = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(stock.stock_quantity, 3);
    }

    #[tokio::test]
    async fn test_cancel_closes_open_attempts() {
        let db = memory_db().await;
        let product = db.products().insert(&sample_product("farmer-1", 1_000, 5)).await.unwrap();
        let order = sample_order("buyer-1", &[(&product, 1)], PaymentMethod::CashOnDelivery);
        let cash = sample_transaction(&order, TransactionStatus::Pending);
        db.orders().create_with_reservation(&order, Some(&cash)).await.unwrap();

        assert!(db.orders().cancel_and_restock(&order.id).await.unwrap());

        let closed = db.transactions().get_by_id(&cash.id).await.unwrap().unwrap();
        assert_eq!(closed.status, TransactionStatus::Failed);
        assert_eq!(closed.failure_code.as_deref(), Some(ORDER_CANCELLED));
        let loaded = db.orders().get_by_id(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.payment.status, PaymentStatus::Failed);
        assert!(!db.transactions().settle_cash_on_delivery(&order.id).await.unwrap());
    }
}
