//! # Payment Service
//!
//! ## Transaction Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  initiate ──► insert Transaction (initiated | pending)                  │
//! │                 │                                                       │
//! │                 ├── gateway.initiate ok   → metadata stored             │
//! │                 └── gateway.initiate err  → last_error stored,          │
//! │                                             status unchanged            │
//! │                                                                         │
//! │  verify   ──► reference from callback → Transaction                     │
//! │                 │                                                       │
//! │                 ├── already closed        → returned as is              │
//! │                 ├── gateway: Completed    → completed, order paid       │
//! │                 │     (order cancelled or → refunded at once)           │
//! │                 │      already paid                                     │
//! │                 ├── gateway: Failed       → failed, order failed        │
//! │                 ├── gateway: Pending      → nothing changes             │
//! │                 └── gateway error         → last_error only             │
//! │                                                                         │
//! │  refund   ──► refunded += amount (single conditional UPDATE)            │
//! │                 └── fully refunded        → order refunded, and         │
//! │                                             cancelled unless delivered  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every state change is a conditional update in the database, so duplicate
//! or concurrent callbacks for the same transaction apply at most once.
//!
//! An order has at most one open attempt. Starting a new one closes the
//! others as `SUPERSEDED`; cancelling the order closes them as
//! `ORDER_CANCELLED`. A digital attempt closed that way is still verified
//! when its callback arrives, since the buyer may have paid before it was
//! closed.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PaymentPolicy;
use crate::error::{ServiceError, ServiceResult};
use crate::services::notification_service::{Notification, Notifier};
use doko_core::validation::validate_refund_reason;
use doko_core::{
    Actor, Capability, CoreError, Money, Order, OrderStatus, PaymentMethod, Transaction,
    TransactionStatus, ValidationError,
};
use doko_db::{Completion, Database};
use doko_gateway::{
    CallbackData, GatewayPayload, GatewayRegistry, InitiationRequest, PaymentAction,
    PaymentGateway, VerificationOutcome,
};

/// Stale transactions re-verified per reconciler pass.
const RECONCILE_BATCH: u32 = 100;

/// Result of starting a payment.
#[derive(Debug, Clone, Serialize)]
pub struct Initiation {
    pub transaction: Transaction,
    pub payload: GatewayPayload,
}

/// Counts from one reconciler pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_open: usize,
    pub errors: usize,
}

pub struct PaymentService {
    db: Database,
    gateways: GatewayRegistry,
    policy: PaymentPolicy,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        db: Database,
        gateways: GatewayRegistry,
        policy: PaymentPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        PaymentService {
            db,
            gateways,
            policy,
            notifier,
        }
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    /// Payment methods buyers can choose right now.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.gateways.methods()
    }

    // =========================================================================
    // Initiation
    // =========================================================================

    /// Starts a payment attempt for the buyer's order.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn initiate(
        &self,
        order_id: &str,
        actor: &Actor,
        method: PaymentMethod,
    ) -> ServiceResult<Initiation> {
        actor.require(Capability::InitiatePayment)?;

        let order = self.load_order(order_id).await?;
        if !order.is_buyer(&actor.user_id) {
            return Err(CoreError::not_authorized("only the buyer can pay for an order").into());
        }
        ensure_payable(&order)?;

        let gateway = self.gateways.get(method)?;

        if method == PaymentMethod::CashOnDelivery {
            if let Some(open) = self.open_cash_on_delivery(&order.id).await? {
                debug!(order_id = %order.id, transaction_id = %open.id, "Reusing open COD transaction");
                self.db
                    .orders()
                    .set_payment(&order.id, method, method.initial_payment_status())
                    .await?;
                return Ok(Initiation {
                    transaction: open,
                    payload: cash_payload(),
                });
            }
        }

        // The courier must not collect, and an old checkout page must not
        // leave a second open charge.
        let superseded = self.db.transactions().supersede_open(&order.id).await?;
        if superseded > 0 {
            debug!(order_id = %order.id, superseded, "Earlier payment attempts superseded");
        }

        if !self
            .db
            .orders()
            .set_payment(&order.id, method, method.initial_payment_status())
            .await?
        {
            // Paid or cancelled between our read and the update.
            let current = self.load_order(order_id).await?;
            ensure_payable(&current)?;
            return Err(doko_db::DbError::stale("Order", order_id).into());
        }

        let mut transaction = new_transaction(&order, method);
        self.db.transactions().insert(&transaction).await?;

        let request = InitiationRequest {
            transaction_id: transaction.id.clone(),
            reference: transaction.reference.clone(),
            order_id: order.id.clone(),
            amount: order.totals.grand_total,
            description: format!("DOKO order {}", order.id),
            customer_name: order.shipping_address.recipient_name.clone(),
            customer_phone: order.shipping_address.phone.clone(),
        };

        match gateway.initiate(&request).await {
            Ok(payload) => {
                if payload.metadata.as_object().is_some_and(|m| !m.is_empty()) {
                    self.db
                        .transactions()
                        .set_metadata(&transaction.id, &payload.metadata)
                        .await?;
                    transaction.gateway_metadata = payload.metadata.clone();
                }
                info!(
                    order_id = %order.id,
                    transaction_id = %transaction.id,
                    %method,
                    amount = %transaction.amount(),
                    "Payment initiated"
                );
                Ok(Initiation {
                    transaction,
                    payload,
                })
            }
            Err(e) => {
                warn!(transaction_id = %transaction.id, %method, error = %e, "Gateway initiation failed");
                self.db
                    .transactions()
                    .record_upstream_error(&transaction.id, &e.to_string())
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn open_cash_on_delivery(&self, order_id: &str) -> ServiceResult<Option<Transaction>> {
        Ok(self
            .db
            .transactions()
            .list_for_order(order_id)
            .await?
            .into_iter()
            .find(|t| t.method == PaymentMethod::CashOnDelivery && t.status.is_open()))
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Handles a gateway redirect callback.
    #[instrument(skip(self, callback))]
    pub async fn verify(
        &self,
        method: PaymentMethod,
        callback: &CallbackData,
    ) -> ServiceResult<Transaction> {
        let gateway = self.gateways.get(method)?;
        let reference = gateway.reference_from_callback(callback)?;

        let transaction = self
            .db
            .transactions()
            .get_by_reference(&reference)
            .await?
            .filter(|t| t.method == method)
            .ok_or_else(|| CoreError::TransactionNotFound(reference.clone()))?;

        self.verify_transaction(gateway.as_ref(), transaction, Some(callback))
            .await
    }

    async fn verify_transaction(
        &self,
        gateway: &dyn PaymentGateway,
        transaction: Transaction,
        callback: Option<&CallbackData>,
    ) -> ServiceResult<Transaction> {
        if !transaction.status.is_open() && !transaction.may_still_capture() {
            debug!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "Transaction already closed, verify is a no-op"
            );
            return Ok(transaction);
        }

        let verification = match gateway.verify(&transaction, callback).await {
            Ok(v) => v,
            Err(e) => {
                warn!(transaction_id = %transaction.id, error = %e, "Gateway verification failed");
                if !e.is_callback_error() {
                    self.db
                        .transactions()
                        .record_upstream_error(&transaction.id, &e.to_string())
                        .await?;
                }
                return Err(e.into());
            }
        };

        let metadata = with_verification(&transaction.gateway_metadata, verification.raw.clone());

        match verification.outcome {
            VerificationOutcome::Completed => {
                match self.db.transactions().complete(&transaction.id, &metadata).await? {
                    Completion::Paid => {
                        info!(
                            transaction_id = %transaction.id,
                            order_id = %transaction.order_id,
                            "Payment completed"
                        );
                        self.notifier.notify(Notification::PaymentCompleted {
                            order_id: transaction.order_id.clone(),
                            transaction_id: transaction.id.clone(),
                        });
                    }
                    Completion::Refunded => {
                        warn!(
                            transaction_id = %transaction.id,
                            order_id = %transaction.order_id,
                            "Payment arrived for a cancelled or already paid order, refunded"
                        );
                        self.notifier.notify(Notification::RefundIssued {
                            order_id: transaction.order_id.clone(),
                            transaction_id: transaction.id.clone(),
                            amount: transaction.amount(),
                            fully_refunded: true,
                        });
                    }
                    Completion::AlreadyClosed => {}
                }
            }
            VerificationOutcome::Failed => {
                let code = verification
                    .code
                    .clone()
                    .unwrap_or_else(|| verification.status.clone());
                let message = verification
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("gateway reported {}", verification.status));
                if self
                    .db
                    .transactions()
                    .fail(&transaction.id, &code, &message, &metadata)
                    .await?
                {
                    info!(transaction_id = %transaction.id, code = %code, "Payment failed");
                    self.notifier.notify(Notification::PaymentFailed {
                        order_id: transaction.order_id.clone(),
                        transaction_id: transaction.id.clone(),
                        code,
                    });
                }
            }
            VerificationOutcome::Pending => {
                debug!(
                    transaction_id = %transaction.id,
                    status = %verification.status,
                    "Gateway has no final answer yet"
                );
            }
        }

        self.load_transaction(&transaction.id).await
    }

    /// Re-verifies open digital transactions older than `older_than`.
    #[instrument(skip(self))]
    pub async fn reconcile_stale(&self, older_than: Duration) -> ServiceResult<ReconcileReport> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| CoreError::Validation(ValidationError::InvalidFormat {
                field: "older_than".into(),
                reason: e.to_string(),
            }))?;
        let cutoff = Utc::now() - age;
        let stale = self.db.transactions().list_stale(cutoff, RECONCILE_BATCH).await?;

        let mut report = ReconcileReport {
            checked: stale.len(),
            ..ReconcileReport::default()
        };

        for transaction in stale {
            let id = transaction.id.clone();
            let gateway = match self.gateways.get(transaction.method) {
                Ok(gateway) => gateway,
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "No gateway to reconcile with");
                    report.errors += 1;
                    continue;
                }
            };

            match self.verify_transaction(gateway.as_ref(), transaction, None).await {
                Ok(t) => match t.status {
                    TransactionStatus::Completed | TransactionStatus::Refunded => report.completed += 1,
                    TransactionStatus::Failed => report.failed += 1,
                    TransactionStatus::Initiated | TransactionStatus::Pending => {
                        report.still_open += 1
                    }
                },
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "Reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        if report.checked > 0 {
            info!(?report, "Reconciliation pass finished");
        }
        Ok(report)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Refunds `amount` (default: everything left) of a completed payment.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.user_id))]
    pub async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Money>,
        reason: &str,
        actor: &Actor,
    ) -> ServiceResult<Transaction> {
        actor.require(Capability::RefundTransaction)?;
        validate_refund_reason(reason)?;

        let transaction = self.load_transaction(transaction_id).await?;
        self.apply_refund(transaction, amount, reason.trim(), &actor.user_id, true)
            .await
    }

    /// Refunds whatever is left of every completed payment on the order, as
    /// part of cancelling it. The caller has already authorized the
    /// cancellation. Returns how many payments were refunded.
    pub async fn refund_for_cancellation(&self, order: &Order, actor: &Actor) -> ServiceResult<usize> {
        let completed = self
            .db
            .transactions()
            .list_completed_for_order(&order.id)
            .await?;

        let mut refunded = 0;
        for transaction in completed {
            if !transaction.remaining().is_positive() {
                continue;
            }
            self.apply_refund(transaction, None, "order cancelled", &actor.user_id, false)
                .await?;
            refunded += 1;
        }
        Ok(refunded)
    }

    async fn apply_refund(
        &self,
        transaction: Transaction,
        amount: Option<Money>,
        reason: &str,
        actor_id: &str,
        enforce_window: bool,
    ) -> ServiceResult<Transaction> {
        let not_refundable = |reason: String| CoreError::NotRefundable {
            transaction_id: transaction.id.clone(),
            reason,
        };

        if transaction.status != TransactionStatus::Completed {
            return Err(not_refundable(format!("transaction is {}", transaction.status)).into());
        }

        let remaining = transaction.remaining();
        if !remaining.is_positive() {
            return Err(not_refundable("nothing left to refund".into()).into());
        }

        if enforce_window {
            let completed_at = transaction
                .completed_at
                .ok_or_else(|| not_refundable("completion time unknown".into()))?;
            if !self.policy.refund.is_within_window(completed_at, Utc::now()) {
                return Err(not_refundable(format!(
                    "refund window of {} days has passed",
                    self.policy.refund.window.num_days()
                ))
                .into());
            }
        }

        let amount = amount.unwrap_or(remaining);
        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "amount".into(),
            }
            .into());
        }
        if amount > remaining {
            return Err(CoreError::RefundExceedsBalance {
                requested: amount,
                remaining,
            }
            .into());
        }

        if !self
            .db
            .transactions()
            .apply_refund(&transaction.id, amount.paisa(), reason, actor_id)
            .await?
        {
            // A concurrent refund got there first.
            let current = self.load_transaction(&transaction.id).await?;
            return Err(CoreError::RefundExceedsBalance {
                requested: amount,
                remaining: current.remaining(),
            }
            .into());
        }

        let updated = self.load_transaction(&transaction.id).await?;
        let fully_refunded = updated.status == TransactionStatus::Refunded;

        if fully_refunded {
            let order = self.load_order(&updated.order_id).await?;
            if order.status != OrderStatus::Delivered
                && self.db.orders().cancel_and_restock(&order.id).await?
            {
                info!(order_id = %order.id, "Order cancelled after full refund");
                self.notifier.notify(Notification::OrderStatusChanged {
                    order_id: order.id.clone(),
                    status: OrderStatus::Cancelled,
                });
            }
        }

        info!(
            transaction_id = %updated.id,
            amount = %amount,
            refunded = %updated.refunded(),
            fully_refunded,
            "Refund applied"
        );
        self.notifier.notify(Notification::RefundIssued {
            order_id: updated.order_id.clone(),
            transaction_id: updated.id.clone(),
            amount,
            fully_refunded,
        });

        Ok(updated)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_transaction(&self, id: &str, actor: &Actor) -> ServiceResult<Transaction> {
        let transaction = self.load_transaction(id).await?;
        let order = self.load_order(&transaction.order_id).await?;
        if !actor.can_view(&order) {
            return Err(CoreError::not_authorized("not a party to this order").into());
        }
        Ok(transaction)
    }

    pub async fn list_for_order(&self, order_id: &str, actor: &Actor) -> ServiceResult<Vec<Transaction>> {
        let order = self.load_order(order_id).await?;
        if !actor.can_view(&order) {
            return Err(CoreError::not_authorized("not a party to this order").into());
        }
        Ok(self.db.transactions().list_for_order(order_id).await?)
    }

    async fn load_order(&self, id: &str) -> ServiceResult<Order> {
        self.db
            .orders()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::from(CoreError::OrderNotFound(id.to_string())))
    }

    async fn load_transaction(&self, id: &str) -> ServiceResult<Transaction> {
        self.db
            .transactions()
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::from(CoreError::TransactionNotFound(id.to_string())))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn ensure_payable(order: &Order) -> ServiceResult<()> {
    if order.status == OrderStatus::Cancelled {
        return Err(CoreError::OrderCancelled {
            order_id: order.id.clone(),
        }
        .into());
    }
    if order.payment.status.is_settled() {
        return Err(CoreError::AlreadyPaid {
            order_id: order.id.clone(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn new_transaction(order: &Order, method: PaymentMethod) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: Uuid::new_v4().to_string(),
        order_id: order.id.clone(),
        buyer_id: order.buyer_id.clone(),
        method,
        reference: Uuid::new_v4().to_string(),
        amount_paisa: order.totals.grand_total.paisa(),
        refunded_paisa: 0,
        status: if method.is_digital() {
            TransactionStatus::Initiated
        } else {
            TransactionStatus::Pending
        },
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

fn cash_payload() -> GatewayPayload {
    GatewayPayload {
        method: PaymentMethod::CashOnDelivery,
        action: PaymentAction::None,
        metadata: serde_json::json!({}),
    }
}

/// Keeps what initiation stored (pidx, signed payload) and adds the
/// gateway's latest answer.
fn with_verification(stored: &serde_json::Value, raw: serde_json::Value) -> serde_json::Value {
    let mut merged = match stored {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert("verification".to_string(), raw);
    serde_json::Value::Object(merged)
}
