//! # DOKO API
//!
//! HTTP server for the DOKO marketplace: catalog, checkout, fulfilment and
//! payments through eSewa, Khalti or cash on delivery.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            DOKO API                                     │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐│
//! │  │ CatalogService │  │  OrderService  │  │  PaymentService            ││
//! │  │                │  │                │  │                            ││
//! │  │ • list / get   │  │ • create       │  │ • initiate                 ││
//! │  │ • create       │  │ • update_status│  │ • verify (callbacks)       ││
//! │  │                │  │ • assign       │  │ • refund                   ││
//! │  │                │  │ • get / list   │  │ • reconcile_stale          ││
//! │  └────────────────┘  └───────┬────────┘  └──────────┬─────────────────┘│
//! │                              └──── refund first ────┘                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Infrastructure                               │  │
//! │  │                                                                   │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐│  │
//! │  │  │   SQLite     │  │  Gateways    │  │    JWT Auth              ││  │
//! │  │  │  (doko-db)   │  │(doko-gateway)│  │                          ││  │
//! │  │  │ orders, stock│  │ eSewa, Khalti│  │ sub + role → Actor       ││  │
//! │  │  └──────────────┘  └──────────────┘  └──────────────────────────┘│  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! See [`config::ApiConfig`]. The most important variables:
//! - `HTTP_PORT` - listen port (default: 8080)
//! - `DATABASE_PATH` - SQLite file
//! - `JWT_SECRET` - secret for bearer tokens
//! - `ESEWA_SECRET_KEY`, `KHALTI_SECRET_KEY` - enable the digital gateways

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use doko_db::Database;

use crate::auth::JwtManager;
use crate::services::catalog_service::CatalogService;
use crate::services::notification_service::BroadcastNotifier;
use crate::services::order_service::OrderService;
use crate::services::payment_service::PaymentService;

// Re-exports
pub use config::ApiConfig;
pub use error::{ApiError, ServiceError};
pub use routes::router;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub catalog: CatalogService,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub jwt: Arc<JwtManager>,
    pub notifier: Arc<BroadcastNotifier>,
}

impl AppState {
    /// Wires the services around one database and gateway registry.
    pub fn new(
        db: Database,
        gateways: doko_gateway::GatewayRegistry,
        config: &ApiConfig,
    ) -> Self {
        let notifier = Arc::new(BroadcastNotifier::default());
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateways,
            config.payment,
            notifier.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            config.shipping,
            payments.clone(),
            notifier.clone(),
        ));

        AppState {
            catalog: CatalogService::new(db.clone()),
            orders,
            payments,
            jwt: Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_lifetime_secs)),
            notifier,
            db,
        }
    }
}
