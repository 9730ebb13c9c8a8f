//! Product listings: browse for everyone, create for farmers and admins.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use doko_core::validation::{
    validate_price_paisa, validate_product_name, validate_stock_quantity, validate_unit,
};
use doko_core::{Actor, Capability, CoreError, Product};
use doko_db::Database;

/// Upper bound for a single catalog page.
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub unit: String,
    pub price_paisa: i64,
    pub stock_quantity: i64,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Database,
}

impl CatalogService {
    pub fn new(db: Database) -> Self {
        CatalogService { db }
    }

    pub async fn list_available(&self, limit: Option<u32>) -> ServiceResult<Vec<Product>> {
        let limit = limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE);
        Ok(self.db.products().list_available(limit).await?)
    }

    pub async fn get(&self, id: &str) -> ServiceResult<Product> {
        self.db
            .products()
            .get_by_id(id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    /// Lists a new product under the caller's own name.
    #[instrument(skip(self, input), fields(seller_id = %actor.user_id))]
    pub async fn create(&self, actor: &Actor, input: NewProduct) -> ServiceResult<Product> {
        actor.require(Capability::ManageCatalog)?;

        let name = input.name.trim().to_string();
        let unit = input.unit.trim().to_string();
        validate_product_name(&name)?;
        validate_unit(&unit)?;
        validate_price_paisa(input.price_paisa)?;
        validate_stock_quantity(input.stock_quantity)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            seller_id: actor.user_id.clone(),
            name,
            description: input
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            unit,
            price_paisa: input.price_paisa,
            stock_quantity: input.stock_quantity,
            is_available: input.stock_quantity > 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let product = self.db.products().insert(&product).await.map_err(ServiceError::from)?;
        info!(product_id = %product.id, price = %product.price(), "Product listed");
        Ok(product)
    }
}
