//! # HTTP Routes
//!
//! ```text
//! ┌────────┬──────────────────────────────────────┬──────────────────────────┐
//! │ Method │ Path                                 │ Caller                   │
//! ├────────┼──────────────────────────────────────┼──────────────────────────┤
//! │ GET    │ /health                              │ anyone                   │
//! │ GET    │ /products, /products/{id}            │ anyone                   │
//! │ POST   │ /products                            │ farmer, admin            │
//! │ POST   │ /orders                              │ buyer, farmer            │
//! │ GET    │ /orders, /orders/{id}                │ parties to the order     │
//! │ PUT    │ /orders/{id}/status                  │ per transition           │
//! │ PUT    │ /orders/{id}/transporter             │ seller, admin            │
//! │ GET    │ /orders/{id}/transactions            │ parties to the order     │
//! │ POST   │ /payments/{gateway}/initiate         │ the order's buyer        │
//! │ GET    │ /payments/{gateway}/verify  (query)  │ gateway redirect         │
//! │ POST   │ /payments/{gateway}/verify  (form)   │ gateway redirect         │
//! │ GET    │ /payments/transactions/{id}          │ parties to the order     │
//! │ POST   │ /payments/transactions/{id}/refund   │ admin                    │
//! └────────┴──────────────────────────────────────┴──────────────────────────┘
//! ```
//!
//! Everything except health, catalog reads and verify needs
//! `Authorization: Bearer <jwt>`.

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::AuthActor;
use crate::error::ApiError;
use crate::services::catalog_service::NewProduct;
use crate::services::order_service::NewOrder;
use crate::services::payment_service::Initiation;
use crate::AppState;
use doko_core::{
    Money, Order, OrderStatus, PaymentMethod, Product, Transaction, TransactionStatus,
};

type ApiResult<T> = Result<T, ApiError>;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/products", get(list_products).post(create_product))
        .route("/products/{id}", get(get_product))
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/status", put(update_order_status))
        .route("/orders/{id}/transporter", put(assign_transporter))
        .route("/orders/{id}/transactions", get(list_order_transactions))
        .route("/payments/{gateway}/initiate", post(initiate_payment))
        .route(
            "/payments/{gateway}/verify",
            get(verify_payment_query).post(verify_payment_form),
        )
        .route("/payments/transactions/{id}", get(get_transaction))
        .route("/payments/transactions/{id}/refund", post(refund_transaction))
        .with_state(state)
}

// =============================================================================
// Request / Response Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct TransporterAssignment {
    pub transporter_id: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount_paisa: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub payment_methods: Vec<PaymentMethod>,
}

/// What an unauthenticated gateway redirect gets to see.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub transaction_id: String,
    pub order_id: String,
    pub status: TransactionStatus,
    pub amount: Money,
}

impl From<Transaction> for VerifyResponse {
    fn from(t: Transaction) -> Self {
        VerifyResponse {
            amount: t.amount(),
            transaction_id: t.id,
            order_id: t.order_id,
            status: t.status,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.db.health_check().await;
    let body = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        payment_methods: state.payments.methods(),
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(state.catalog.list_available(query.limit).await?))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.catalog.get(&id).await?))
}

async fn create_product(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(input): Json<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = state.catalog.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn create_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(input): Json<NewOrder>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = state.orders.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list_mine(&actor).await?))
}

async fn get_order(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.orders.get(&id, &actor).await?))
}

async fn update_order_status(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> ApiResult<Json<Order>> {
    Ok(Json(state.orders.update_status(&id, &actor, body.status).await?))
}

async fn assign_transporter(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
    Json(body): Json<TransporterAssignment>,
) -> ApiResult<Json<Order>> {
    Ok(Json(
        state
            .orders
            .assign_transporter(&id, &actor, &body.transporter_id)
            .await?,
    ))
}

async fn list_order_transactions(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Transaction>>> {
    Ok(Json(state.payments.list_for_order(&id, &actor).await?))
}

async fn initiate_payment(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(gateway): Path<String>,
    Json(body): Json<InitiateRequest>,
) -> ApiResult<Json<Initiation>> {
    let method: PaymentMethod = gateway.parse()?;
    Ok(Json(state.payments.initiate(&body.order_id, &actor, method).await?))
}

async fn verify_payment_query(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(callback): Query<HashMap<String, String>>,
) -> ApiResult<Json<VerifyResponse>> {
    verify(&state, &gateway, callback).await
}

async fn verify_payment_form(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Form(callback): Form<HashMap<String, String>>,
) -> ApiResult<Json<VerifyResponse>> {
    verify(&state, &gateway, callback).await
}

async fn verify(
    state: &AppState,
    gateway: &str,
    callback: HashMap<String, String>,
) -> ApiResult<Json<VerifyResponse>> {
    let method: PaymentMethod = gateway.parse()?;
    let transaction = state.payments.verify(method, &callback).await?;
    Ok(Json(transaction.into()))
}

async fn get_transaction(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(state.payments.get_transaction(&id, &actor).await?))
}

async fn refund_transaction(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<String>,
    Json(body): Json<RefundRequest>,
) -> ApiResult<Json<Transaction>> {
    let amount = body.amount_paisa.map(Money::from_paisa);
    Ok(Json(
        state
            .payments
            .refund(&id, amount, &body.reason, &actor)
            .await?,
    ))
}

// =============================================================================
// Router Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{address, test_state, MockGateway};
    use axum::body::Body;
    use axum::http::{header, Request};
    use doko_core::Role;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        esewa: Arc<MockGateway>,
    }

    impl TestApp {
        async fn new() -> Self {
            let (state, esewa) = test_state().await;
            TestApp { state, esewa }
        }

        fn token(&self, user: &str, role: Role) -> String {
            self.state.jwt.issue_token(user, role).unwrap()
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(json) => request
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };

            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new().await;
        let (status, body) = app.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], true);
        assert!(body["payment_methods"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("esewa")));
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_token() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send("POST", "/orders", None, Some(serde_json::json!({})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

        let (status, _) = app.send("GET", "/orders", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_gateway_is_a_bad_request() {
        let app = TestApp::new().await;
        let buyer = app.token("buyer-1", Role::Buyer);

        let (status, body) = app
            .send(
                "POST",
                "/payments/paypal/initiate",
                Some(buyer.as_str()),
                Some(serde_json::json!({ "order_id": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "validation");

        let (status, body) = app
            .send(
                "POST",
                "/payments/khalti/initiate",
                Some(buyer.as_str()),
                Some(serde_json::json!({ "order_id": "x" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    }

    #[tokio::test]
    async fn test_checkout_pay_and_refund_over_http() {
        let app = TestApp::new().await;
        let farmer = app.token("farmer-1", Role::Farmer);
        let buyer = app.token("buyer-1", Role::Buyer);
        let admin = app.token("admin-1", Role::Admin);

        let (status, product) = app
            .send(
                "POST",
                "/products",
                Some(farmer.as_str()),
                Some(serde_json::json!({
                    "name": "Himalayan Apples",
                    "unit": "kg",
                    "price_paisa": 50_000,
                    "stock_quantity": 3
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let product_id = product["id"].as_str().unwrap().to_string();

        let (status, order) = app
            .send(
                "POST",
                "/orders",
                Some(buyer.as_str()),
                Some(serde_json::json!({
                    "items": [{ "product_id": product_id, "quantity": 1 }],
                    "shipping_address": address(),
                    "payment_method": "esewa"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        assert_eq!(order["status"], "created");
        let order_id = order["id"].as_str().unwrap().to_string();

        let (status, started) = app
            .send(
                "POST",
                "/payments/esewa/initiate",
                Some(buyer.as_str()),
                Some(serde_json::json!({ "order_id": order_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{started}");
        assert_eq!(started["payload"]["action"]["type"], "redirect");
        let reference = started["transaction"]["reference"].as_str().unwrap().to_string();
        let txn_id = started["transaction"]["id"].as_str().unwrap().to_string();

        let (status, verified) = app
            .send("GET", &format!("/payments/esewa/verify?ref={reference}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["status"], "completed");
        assert!(verified.get("gateway_metadata").is_none());
        assert_eq!(app.esewa.verify_calls(), 1);

        let (status, body) = app
            .send(
                "POST",
                &format!("/payments/transactions/{txn_id}/refund"),
                Some(buyer.as_str()),
                Some(serde_json::json!({ "reason": "changed mind" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

        let (status, body) = app
            .send(
                "POST",
                &format!("/payments/transactions/{txn_id}/refund"),
                Some(admin.as_str()),
                Some(serde_json::json!({ "amount_paisa": 60_000, "reason": "too much" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "REFUND_EXCEEDS_BALANCE");

        let (status, refunded) = app
            .send(
                "POST",
                &format!("/payments/transactions/{txn_id}/refund"),
                Some(admin.as_str()),
                Some(serde_json::json!({ "reason": "apples bruised in transit" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refunded["status"], "refunded");

        let (status, order) = app
            .send("GET", &format!("/orders/{order_id}"), Some(buyer.as_str()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["status"], "cancelled");
        assert_eq!(order["payment"]["status"], "refunded");

        let (_, txns) = app
            .send("GET", &format!("/orders/{order_id}/transactions"), Some(buyer.as_str()), None)
            .await;
        assert_eq!(txns.as_array().unwrap().len(), 1);

        let (status, _) = app
            .send(
                "GET",
                &format!("/payments/transactions/{txn_id}"),
                Some(app.token("buyer-2", Role::Buyer).as_str()),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_verify_accepts_form_posts() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/payments/esewa/verify")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("ref=unknown-reference"))
            .unwrap();

        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_update_over_http() {
        let app = TestApp::new().await;
        let farmer = app.token("farmer-1", Role::Farmer);
        let buyer = app.token("buyer-1", Role::Buyer);

        let (_, product) = app
            .send(
                "POST",
                "/products",
                Some(farmer.as_str()),
                Some(serde_json::json!({
                    "name": "Buckwheat Flour",
                    "unit": "kg",
                    "price_paisa": 20_000,
                    "stock_quantity": 5
                })),
            )
            .await;
        let (_, order) = app
            .send(
                "POST",
                "/orders",
                Some(buyer.as_str()),
                Some(serde_json::json!({
                    "items": [{ "product_id": product["id"], "quantity": 2 }],
                    "shipping_address": address(),
                    "payment_method": "cash_on_delivery"
                })),
            )
            .await;
        let order_id = order["id"].as_str().unwrap();

        let (status, body) = app
            .send(
                "PUT",
                &format!("/orders/{order_id}/status"),
                Some(buyer.as_str()),
                Some(serde_json::json!({ "status": "confirmed" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

        let (status, body) = app
            .send(
                "PUT",
                &format!("/orders/{order_id}/status"),
                Some(farmer.as_str()),
                Some(serde_json::json!({ "status": "delivered" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

        let (status, body) = app
            .send(
                "PUT",
                &format!("/orders/{order_id}/transporter"),
                Some(farmer.as_str()),
                Some(serde_json::json!({ "transporter_id": "transporter-1" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transporter_id"], "transporter-1");

        let (status, body) = app
            .send(
                "PUT",
                &format!("/orders/{order_id}/status"),
                Some(farmer.as_str()),
                Some(serde_json::json!({ "status": "confirmed" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "confirmed");
    }
}
