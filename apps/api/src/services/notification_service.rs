//! Fire-and-forget notifications.
//!
//! Services publish domain events; subscribers (the email worker, tests)
//! read them off a tokio broadcast channel. A send with nobody listening is
//! logged and otherwise ignored. Nothing here can fail a business operation.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use doko_core::{Money, OrderStatus};

/// Channel capacity; slow subscribers skip ahead rather than block senders.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced {
        order_id: String,
        buyer_id: String,
        grand_total: Money,
    },
    OrderStatusChanged {
        order_id: String,
        status: OrderStatus,
    },
    PaymentCompleted {
        order_id: String,
        transaction_id: String,
    },
    PaymentFailed {
        order_id: String,
        transaction_id: String,
        code: String,
    },
    RefundIssued {
        order_id: String,
        transaction_id: String,
        amount: Money,
        fully_refunded: bool,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Broadcasts notifications to every current subscriber.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        if let Err(broadcast::error::SendError(dropped)) = self.sender.send(notification) {
            debug!(notification = ?dropped, "No notification subscribers");
        }
    }
}
