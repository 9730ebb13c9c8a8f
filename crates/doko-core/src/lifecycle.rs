//! # Lifecycle Module
//!
//! State machines for orders and payment transactions.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Order Lifecycle                                  │
//! │                                                                         │
//! │   Created ──► Confirmed ──► Dispatched ──► Delivered (terminal)        │
//! │      │            │             │                                       │
//! │      └────────────┴─────────────┴──► Cancelled (terminal)              │
//! │                                                                         │
//! │   • Forward moves are strictly adjacent (no Created → Dispatched)      │
//! │   • No backward moves                                                   │
//! │   • Delivered orders cannot be cancelled                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Lifecycle
//! ```text
//!   Initiated ──► Pending ──► Completed ──► Refunded (terminal)
//!       │            │
//!       └────────────┴──► Failed (terminal)
//!   Initiated ──► Completed (gateway confirmed directly)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{OrderStatus, TransactionStatus};

impl OrderStatus {
    /// The next forward status, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Created => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Dispatched),
            OrderStatus::Dispatched => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Whether the order may still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created | OrderStatus::Confirmed | OrderStatus::Dispatched
        )
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if target == OrderStatus::Cancelled {
            return self.is_cancellable();
        }
        self.next() == Some(target)
    }
}

/// Fails with `InvalidTransition` unless `from → to` is allowed.
pub fn ensure_order_transition(from: OrderStatus, to: OrderStatus) -> CoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Refunded)
    }

    /// Still waiting on the gateway (eligible for verification/reconciliation).
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionStatus::Initiated | TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, target),
            (Initiated, Pending)
                | (Initiated, Completed)
                | (Initiated, Failed)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Completed, Refunded)
        )
    }
}

/// Fails with `InvalidTransactionTransition` unless `from → to` is allowed.
pub fn ensure_transaction_transition(
    from: TransactionStatus,
    to: TransactionStatus,
) -> CoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransactionTransition { from, to })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
