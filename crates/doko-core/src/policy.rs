//! # Policy Module
//!
//! Role/capability authorization and refund eligibility.
//!
//! ## Capability Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Authorization = CAPABILITY (from role)  +  RELATIONSHIP (to the order) │
//! │                                                                         │
//! │  Role ──lookup table──► &[Capability]                                  │
//! │                                                                         │
//! │  buyer       PlaceOrder, CancelOwnOrder, InitiatePayment                │
//! │  farmer      ManageCatalog, ConfirmOrder, DispatchOrder,                │
//! │              CancelAcceptedOrder, AssignTransporter                     │
//! │  transporter DispatchOrder, DeliverOrder                                │
//! │  admin       everything                                                 │
//! │                                                                         │
//! │  Relationship checks (non-admins):                                      │
//! │    CancelOwnOrder      → actor is the order's buyer                    │
//! │    Confirm/Cancel      → actor sells a line of the order               │
//! │    Dispatch            → seller of the order OR assigned transporter   │
//! │    Deliver             → assigned transporter                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Order, OrderStatus, Role};
use crate::DEFAULT_REFUND_WINDOW_DAYS;

// =============================================================================
// Capabilities
// =============================================================================

/// Everything an actor might be allowed to do in this slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PlaceOrder,
    CancelOwnOrder,
    InitiatePayment,
    ManageCatalog,
    ConfirmOrder,
    DispatchOrder,
    DeliverOrder,
    CancelAcceptedOrder,
    AssignTransporter,
    RefundTransaction,
    ViewAllOrders,
}

const BUYER_CAPS: &[Capability] = &[
    Capability::PlaceOrder,
    Capability::CancelOwnOrder,
    Capability::InitiatePayment,
];

// Farmers also buy (inputs, produce from other farms).
const FARMER_CAPS: &[Capability] = &[
    Capability::PlaceOrder,
    Capability::CancelOwnOrder,
    Capability::InitiatePayment,
    Capability::ManageCatalog,
    Capability::ConfirmOrder,
    Capability::DispatchOrder,
    Capability::CancelAcceptedOrder,
    Capability::AssignTransporter,
];

const TRANSPORTER_CAPS: &[Capability] = &[Capability::DispatchOrder, Capability::DeliverOrder];

const ADMIN_CAPS: &[Capability] = &[
    Capability::ManageCatalog,
    Capability::ConfirmOrder,
    Capability::DispatchOrder,
    Capability::DeliverOrder,
    Capability::CancelAcceptedOrder,
    Capability::AssignTransporter,
    Capability::RefundTransaction,
    Capability::ViewAllOrders,
];

impl Role {
    /// Capability lookup table.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Buyer => BUYER_CAPS,
            Role::Farmer => FARMER_CAPS,
            Role::Transporter => TRANSPORTER_CAPS,
            Role::Admin => ADMIN_CAPS,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Requires a capability, independent of any order.
    pub fn require(&self, capability: Capability) -> CoreResult<()> {
        if self.role.has(capability) {
            Ok(())
        } else {
            Err(CoreError::not_authorized(format!(
                "role {} lacks {:?}",
                self.role, capability
            )))
        }
    }

    /// Whether this actor may read the order and its transactions.
    pub fn can_view(&self, order: &Order) -> bool {
        self.role.has(Capability::ViewAllOrders)
            || order.is_buyer(&self.user_id)
            || order.is_seller(&self.user_id)
            || order.is_assigned_transporter(&self.user_id)
    }
}

/// Checks that `actor` may move `order` to `target`.
///
/// Call after the transition itself was validated; this only answers
/// "who", not "whether".
pub fn authorize_transition(actor: &Actor, order: &Order, target: OrderStatus) -> CoreResult<()> {
    let uid = actor.user_id.as_str();
    let admin = actor.is_admin();

    let allowed = match (order.status, target) {
        (OrderStatus::Created, OrderStatus::Cancelled) => {
            actor.role.has(Capability::CancelOwnOrder) && order.is_buyer(uid)
        }
        (_, OrderStatus::Cancelled) => {
            admin || (actor.role.has(Capability::CancelAcceptedOrder) && order.is_seller(uid))
        }
        (_, OrderStatus::Confirmed) => {
            admin || (actor.role.has(Capability::ConfirmOrder) && order.is_seller(uid))
        }
        (_, OrderStatus::Dispatched) => {
            admin
                || (actor.role.has(Capability::DispatchOrder)
                    && (order.is_seller(uid) || order.is_assigned_transporter(uid)))
        }
        (_, OrderStatus::Delivered) => {
            admin || (actor.role.has(Capability::DeliverOrder) && order.is_assigned_transporter(uid))
        }
        (_, OrderStatus::Created) => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(CoreError::not_authorized(format!(
            "{} {} cannot move order {} to {}",
            actor.role, actor.user_id, order.id, target
        )))
    }
}

/// Checks that `actor` may assign a transporter to `order`.
pub fn authorize_assign_transporter(actor: &Actor, order: &Order) -> CoreResult<()> {
    actor.require(Capability::AssignTransporter)?;
    if actor.is_admin() || order.is_seller(&actor.user_id) {
        Ok(())
    } else {
        Err(CoreError::not_authorized("only a seller of this order can assign transport"))
    }
}

// =============================================================================
// Refund Policy
// =============================================================================

/// Business constants for refunds. Configurable, not protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// How long after completion a payment may be refunded.
    pub window: Duration,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        RefundPolicy {
            window: Duration::days(DEFAULT_REFUND_WINDOW_DAYS),
        }
    }
}

impl RefundPolicy {
    pub fn with_window_days(days: i64) -> Self {
        RefundPolicy {
            window: Duration::days(days),
        }
    }

    /// True if a payment completed at `completed_at` is refundable at `now`.
    pub fn is_within_window(&self, completed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now <= completed_at + self.window
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
