//! # Product Repository
//!
//! Database operations for farm product listings.
//!
//! ## Stock Reservation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Read-then-write (WRONG, oversells under concurrency):                  │
//! │    SELECT stock  → 5          SELECT stock → 5                          │
//! │    UPDATE stock = 5 - 3       UPDATE stock = 5 - 3     → sold 6 of 5    │
//! │                                                                         │
//! │  Conditional decrement (this module):                                   │
//! │    UPDATE products                                                      │
//! │       SET stock_quantity = stock_quantity - :qty,                       │
//! │           is_available   = (stock_quantity - :qty > 0)                  │
//! │     WHERE id = :id AND is_active = 1 AND stock_quantity >= :qty         │
//! │                                                                         │
//! │    rows_affected = 1 → reserved                                         │
//! │    rows_affected = 0 → lost the race / inactive / understocked          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `try_reserve` and `release` take a connection rather than the pool so the
//! caller can run them inside its own database transaction.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use doko_core::Product;

const PRODUCT_COLUMNS: &str = r#"
    id, seller_id, name, description, unit,
    price_paisa, stock_quantity, is_available, is_active,
    created_at, updated_at
"#;

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new listing. `is_available` is derived from the stock.
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        debug!(id = %product.id, seller_id = %product.seller_id, "Inserting product");

        let mut product = product.clone();
        product.is_available = product.stock_quantity > 0;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, seller_id, name, description, unit,
                price_paisa, stock_quantity, is_available, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.seller_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.unit)
        .bind(product.price_paisa)
        .bind(product.stock_quantity)
        .bind(product.is_available)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by ID, active or not.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Lists active, in-stock products, newest first.
    pub async fn list_available(&self, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND is_available = 1 \
             ORDER BY created_at DESC LIMIT ?1"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Lists a seller's active listings, including sold-out ones.
    pub async fn list_by_seller(&self, seller_id: &str) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE seller_id = ?1 AND is_active = 1 \
             ORDER BY name"
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(seller_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Changes the listed price. Existing orders keep their snapshot.
    pub async fn update_price(&self, id: &str, price_paisa: i64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET price_paisa = ?2, updated_at = ?3 WHERE id = ?1 AND is_active = 1",
        )
        .bind(id)
        .bind(price_paisa)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Adds harvested stock to a listing.
    pub async fn restock(&self, id: &str, quantity: i64) -> DbResult<()> {
        debug!(id = %id, quantity, "Restocking product");

        let mut conn = self.pool.acquire().await?;
        if !Self::release(&mut *conn, id, quantity).await? {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Hides a listing. Rows are never deleted; orders reference them.
    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    // =========================================================================
    // Transactional primitives
    // =========================================================================

    /// Atomically takes `quantity` units out of stock.
    ///
    /// Returns `false` (and changes nothing) when the product is inactive or
    /// has fewer than `quantity` units left.
    pub async fn try_reserve(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = stock_quantity - ?2,
                is_available = (stock_quantity - ?2 > 0),
                updated_at = ?3
            WHERE id = ?1 AND is_active = 1 AND stock_quantity >= ?2
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        let reserved = result.rows_affected() == 1;
        debug!(product_id = %id, quantity, reserved, "Stock reservation");
        Ok(reserved)
    }

    /// Puts `quantity` units back into stock.
    ///
    /// Inactive listings are restocked too, so a cancelled order never loses
    /// units. Returns `false` if the product does not exist.
    pub async fn release(conn: &mut SqliteConnection, id: &str, quantity: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products SET
                stock_quantity = stock_quantity + ?2,
                is_available = (stock_quantity + ?2 > 0),
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
