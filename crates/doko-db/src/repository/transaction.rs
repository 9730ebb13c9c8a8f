//! # Transaction Repository
//!
//! Database operations for payment attempts and their refunds.
//!
//! ## Conditional Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  complete / fail    WHERE status IN ('initiated', 'pending')            │
//! │                     → duplicate callbacks: second one changes nothing   │
//! │                                                                         │
//! │  complete           order cancelled or already paid?                    │
//! │                     → captured and refunded in full, same transaction   │
//! │                                                                         │
//! │  apply_refund       SET refunded = refunded + :amt                      │
//! │                     WHERE status = 'completed'                          │
//! │                       AND refunded + :amt <= amount                     │
//! │                     → two racing refunds can never exceed the amount    │
//! │                                                                         │
//! │  Each of these also updates the order's payment status inside the      │
//! │  same database transaction.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use doko_core::{
    OrderStatus, PaymentMethod, PaymentStatus, RefundRecord, Transaction, TransactionStatus,
    ORDER_CANCELLED, SUPERSEDED,
};

/// `actor_id` of refunds issued without a human asking for them.
pub const SYSTEM_ACTOR: &str = "system";

/// What [`TransactionRepository::complete`] did with a gateway confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Completed, refunded or failed for good before this confirmation.
    AlreadyClosed,
    /// The attempt paid for its order.
    Paid,
    /// The money arrived for an order that was cancelled or already paid
    /// by another attempt, and was refunded in full.
    Refunded,
}

const TRANSACTION_COLUMNS: &str = r#"
    id, order_id, buyer_id, method, reference,
    amount_paisa, refunded_paisa, status, gateway_metadata,
    failure_code, failure_message, last_error,
    created_at, updated_at, completed_at
"#;

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: String,
    order_id: String,
    buyer_id: String,
    method: PaymentMethod,
    reference: String,
    amount_paisa: i64,
    refunded_paisa: i64,
    status: TransactionStatus,
    gateway_metadata: String,
    failure_code: Option<String>,
    failure_message: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_transaction(self, refunds: Vec<RefundRecord>) -> DbResult<Transaction> {
        let gateway_metadata =
            serde_json::from_str(&self.gateway_metadata).map_err(|e| DbError::Decode {
                column: "transactions.gateway_metadata".to_string(),
                message: e.to_string(),
            })?;

        Ok(Transaction {
            id: self.id,
            order_id: self.order_id,
            buyer_id: self.buyer_id,
            method: self.method,
            reference: self.reference,
            amount_paisa: self.amount_paisa,
            refunded_paisa: self.refunded_paisa,
            status: self.status,
            gateway_metadata,
            failure_code: self.failure_code,
            failure_message: self.failure_message,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            refunds,
        })
    }
}

/// Repository for payment transaction operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Stores a new payment attempt.
    pub async fn insert(&self, txn: &Transaction) -> DbResult<()> {
        debug!(
            id = %txn.id,
            order_id = %txn.order_id,
            method = %txn.method,
            amount_paisa = txn.amount_paisa,
            "Inserting transaction"
        );

        let mut conn = self.pool.acquire().await?;
        insert_transaction(&mut conn, txn).await
    }

    /// Gets a transaction (with refunds) by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1");
        self.fetch_one_with(&sql, id).await
    }

    /// Gets a transaction by the reference sent to the gateway.
    pub async fn get_by_reference(&self, reference: &str) -> DbResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = ?1");
        self.fetch_one_with(&sql, reference).await
    }

    /// All attempts for an order, oldest first.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE order_id = ?1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    /// Completed attempts of an order that still hold refundable money.
    pub async fn list_completed_for_order(&self, order_id: &str) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE order_id = ?1 AND status = 'completed' \
             ORDER BY completed_at"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    /// Open digital attempts created before `cutoff`, oldest first.
    pub async fn list_stale(&self, cutoff: DateTime<Utc>, limit: u32) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE status IN ('initiated', 'pending') \
               AND method <> 'cash_on_delivery' \
               AND created_at < ?1 \
             ORDER BY created_at LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    /// Replaces the gateway metadata (e.g. once Khalti returns a pidx).
    pub async fn set_metadata(&self, id: &str, metadata: &serde_json::Value) -> DbResult<()> {
        sqlx::query("UPDATE transactions SET gateway_metadata = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(metadata.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records an upstream failure without touching the status.
    pub async fn record_upstream_error(&self, id: &str, message: &str) -> DbResult<()> {
        sqlx::query("UPDATE transactions SET last_error = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // State changes
    // =========================================================================

    /// Records a gateway confirmation for an attempt.
    ///
    /// Open attempts are accepted, and so are digital attempts closed as
    /// superseded or cancelled (the buyer may have paid anyway). If the
    /// order is cancelled, or another attempt already paid for it, the
    /// captured amount is refunded in full before committing.
    pub async fn complete(&self, id: &str, metadata: &serde_json::Value) -> DbResult<Completion> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let captured: Option<(String, i64)> = sqlx::query_as(
            r#"
            UPDATE transactions SET
                status = 'completed',
                gateway_metadata = ?2,
                failure_code = NULL,
                failure_message = NULL,
                last_error = NULL,
                completed_at = ?3,
                updated_at = ?3
            WHERE id = ?1
              AND (
                status IN ('initiated', 'pending')
                OR (status = 'failed'
                    AND method <> 'cash_on_delivery'
                    AND failure_code IN (?4, ?5))
              )
            RETURNING order_id, amount_paisa
            "#,
        )
        .bind(id)
        .bind(metadata.to_string())
        .bind(now)
        .bind(SUPERSEDED)
        .bind(ORDER_CANCELLED)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((order_id, amount_paisa)) = captured else {
            return Ok(Completion::AlreadyClosed);
        };

        let (order_status, payment_status): (OrderStatus, PaymentStatus) =
            sqlx::query_as("SELECT status, payment_status FROM orders WHERE id = ?1")
                .bind(&order_id)
                .fetch_one(&mut *tx)
                .await?;

        let refund_reason = if order_status == OrderStatus::Cancelled {
            Some("payment arrived after the order was cancelled")
        } else if payment_status.is_settled() {
            Some("order already paid by another attempt")
        } else {
            None
        };

        let Some(reason) = refund_reason else {
            set_order_payment_status(&mut *tx, id, "paid", now).await?;
            tx.commit().await?;
            debug!(transaction_id = %id, "Transaction completed");
            return Ok(Completion::Paid);
        };

        sqlx::query(
            r#"
            UPDATE transactions SET refunded_paisa = amount_paisa, status = 'refunded', updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        insert_refund(&mut *tx, id, amount_paisa, reason, SYSTEM_ACTOR, now).await?;

        // A cancelled order that was never paid now shows the refund.
        sqlx::query(
            r#"
            UPDATE orders SET payment_status = 'refunded', updated_at = ?2
            WHERE id = ?1 AND payment_status NOT IN ('paid', 'refunded')
            "#,
        )
        .bind(&order_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(transaction_id = %id, %order_id, reason, "Late capture refunded");
        Ok(Completion::Refunded)
    }

    /// Marks an open attempt failed. The order's payment status follows,
    /// unless another attempt already paid for it.
    pub async fn fail(
        &self,
        id: &str,
        code: &str,
        message: &str,
        metadata: &serde_json::Value,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = 'failed',
                failure_code = ?2,
                failure_message = ?3,
                gateway_metadata = ?4,
                updated_at = ?5
            WHERE id = ?1 AND status IN ('initiated', 'pending')
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(message)
        .bind(metadata.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        set_order_payment_status(&mut *tx, id, "failed", now).await?;
        tx.commit().await?;

        debug!(transaction_id = %id, code, "Transaction failed");
        Ok(true)
    }

    /// Fails every open attempt of an order with `SUPERSEDED`. The order's
    /// payment status is left to the caller.
    pub async fn supersede_open(&self, order_id: &str) -> DbResult<u64> {
        let mut conn = self.pool.acquire().await?;
        close_open_attempts(
            &mut conn,
            order_id,
            SUPERSEDED,
            "replaced by a newer payment attempt",
            Utc::now(),
        )
        .await
    }

    /// Settles the pending cash-on-delivery attempt of a delivered order.
    pub async fn settle_cash_on_delivery(&self, order_id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE transactions SET status = 'completed', completed_at = ?2, updated_at = ?2
            WHERE id = (
                SELECT id FROM transactions
                WHERE order_id = ?1 AND method = 'cash_on_delivery' AND status = 'pending'
                ORDER BY created_at DESC LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(order_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            return Ok(false);
        };

        set_order_payment_status(&mut *tx, &id, "paid", now).await?;
        tx.commit().await?;

        debug!(order_id = %order_id, transaction_id = %id, "Cash on delivery settled");
        Ok(true)
    }

    /// Applies a (partial) refund atomically.
    ///
    /// Returns `false` and changes nothing if the transaction is not
    /// completed or `amount_paisa` exceeds what is left. When the refund
    /// brings the total to the full amount, the transaction becomes
    /// `refunded` and the order's payment status follows.
    pub async fn apply_refund(
        &self,
        id: &str,
        amount_paisa: i64,
        reason: &str,
        actor_id: &str,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let status: Option<TransactionStatus> = sqlx::query_scalar(
            r#"
            UPDATE transactions SET
                refunded_paisa = refunded_paisa + ?2,
                status = CASE
                    WHEN refunded_paisa + ?2 = amount_paisa THEN 'refunded'
                    ELSE status
                END,
                updated_at = ?3
            WHERE id = ?1
              AND status = 'completed'
              AND ?2 > 0
              AND refunded_paisa + ?2 <= amount_paisa
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(amount_paisa)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Ok(false);
        };

        insert_refund(&mut *tx, id, amount_paisa, reason, actor_id, now).await?;

        if status == TransactionStatus::Refunded {
            set_order_payment_status(&mut *tx, id, "refunded", now).await?;
        }

        tx.commit().await?;

        debug!(transaction_id = %id, amount_paisa, %status, "Refund applied");
        Ok(true)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn fetch_one_with(&self, sql: &str, param: &str) -> DbResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(sql)
            .bind(param)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut conn = self.pool.acquire().await?;
                let refunds = load_refunds(&mut conn, &row.id).await?;
                Ok(Some(row.into_transaction(refunds)?))
            }
            None => Ok(None),
        }
    }

    async fn hydrate(&self, rows: Vec<TransactionRow>) -> DbResult<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        let mut txns = Vec::with_capacity(rows.len());
        for row in rows {
            let refunds = load_refunds(&mut conn, &row.id).await?;
            txns.push(row.into_transaction(refunds)?);
        }
        Ok(txns)
    }
}

pub(crate) async fn insert_transaction(conn: &mut SqliteConnection, txn: &Transaction) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, order_id, buyer_id, method, reference,
            amount_paisa, refunded_paisa, status, gateway_metadata,
            failure_code, failure_message, last_error,
            created_at, updated_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&txn.id)
    .bind(&txn.order_id)
    .bind(&txn.buyer_id)
    .bind(txn.method)
    .bind(&txn.reference)
    .bind(txn.amount_paisa)
    .bind(txn.refunded_paisa)
    .bind(txn.status)
    .bind(txn.gateway_metadata.to_string())
    .bind(&txn.failure_code)
    .bind(&txn.failure_message)
    .bind(&txn.last_error)
    .bind(txn.created_at)
    .bind(txn.updated_at)
    .bind(txn.completed_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Fails every `initiated`/`pending` attempt of an order with `code`.
pub(crate) async fn close_open_attempts(
    conn: &mut SqliteConnection,
    order_id: &str,
    code: &str,
    message: &str,
    now: DateTime<Utc>,
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transactions SET
            status = 'failed',
            failure_code = ?2,
            failure_message = ?3,
            updated_at = ?4
        WHERE order_id = ?1 AND status IN ('initiated', 'pending')
        "#,
    )
    .bind(order_id)
    .bind(code)
    .bind(message)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

async fn insert_refund(
    conn: &mut SqliteConnection,
    txn_id: &str,
    amount_paisa: i64,
    reason: &str,
    actor_id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO refunds (id, transaction_id, amount_paisa, reason, actor_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(txn_id)
    .bind(amount_paisa)
    .bind(reason)
    .bind(actor_id)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

/// Moves the payment status of the order owning transaction `txn_id`.
///
/// A paid order is never downgraded to failed by a later failed attempt.
async fn set_order_payment_status(
    conn: &mut SqliteConnection,
    txn_id: &str,
    status: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE orders SET payment_status = ?2, updated_at = ?3
        WHERE id = (SELECT order_id FROM transactions WHERE id = ?1)
          AND NOT (?2 = 'failed' AND payment_status IN ('paid', 'refunded'))
        "#,
    )
    .bind(txn_id)
    .bind(status)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

async fn load_refunds(conn: &mut SqliteConnection, txn_id: &str) -> DbResult<Vec<RefundRecord>> {
    let refunds = sqlx::query_as::<_, RefundRecord>(
        r#"
        SELECT id, transaction_id, amount_paisa, reason, actor_id, created_at
        FROM refunds
        WHERE transaction_id = ?1
        ORDER BY created_at
        "#,
    )
    .bind(txn_id)
    .fetch_all(conn)
    .await?;

    Ok(refunds)
}

// =============================================================================
// Unit Tests
// =============================================================================
