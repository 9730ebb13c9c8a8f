//! # Pricing Module
//!
//! Line item snapshots, shipping fee and order totals.
//!
//! ## Total Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Product (live catalog)          LineItem (frozen)                      │
//! │  price_paisa = 25_000   ──────►  unit_price = Rs. 250.00                │
//! │  quantity = 2                    line_total = Rs. 500.00                │
//! │                                        │                                │
//! │                                        ▼ Σ                              │
//! │                                  subtotal  = Rs. 500.00                 │
//! │                                  shipping  = Rs.  50.00 (policy)        │
//! │                                  ─────────────────────                  │
//! │                                  grand     = Rs. 550.00                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All arithmetic is checked; an overflowing cart is rejected instead of
//! wrapping into a small (or negative) total.

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{LineItem, OrderTotals, Product};
use crate::DEFAULT_SHIPPING_FEE_PAISA;

// =============================================================================
// Shipping Policy
// =============================================================================

/// How the delivery fee is derived from the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    /// Orders with a subtotal at or above this ship for free.
    pub free_above: Option<Money>,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        ShippingPolicy::flat(Money::from_paisa(DEFAULT_SHIPPING_FEE_PAISA))
    }
}

impl ShippingPolicy {
    /// Same fee for every order.
    pub const fn flat(fee: Money) -> Self {
        ShippingPolicy {
            flat_fee: fee,
            free_above: None,
        }
    }

    pub const fn with_free_above(mut self, threshold: Money) -> Self {
        self.free_above = Some(threshold);
        self
    }

    /// Shipping fee for an order with the given subtotal.
    ///
    /// ```rust
    /// use doko_core::{Money, ShippingPolicy};
    ///
    /// let policy = ShippingPolicy::flat(Money::from_rupees(50))
    ///     .with_free_above(Money::from_rupees(2_000));
    ///
    /// assert_eq!(policy.fee_for(Money::from_rupees(500)), Money::from_rupees(50));
    /// assert_eq!(policy.fee_for(Money::from_rupees(2_000)), Money::zero());
    /// ```
    pub fn fee_for(&self, subtotal: Money) -> Money {
        match self.free_above {
            Some(threshold) if subtotal >= threshold => Money::zero(),
            _ => self.flat_fee,
        }
    }
}

// =============================================================================
// Line Items and Totals
// =============================================================================

/// Snapshots a product into an order line.
pub fn build_line_item(product: &Product, quantity: i64) -> CoreResult<LineItem> {
    let line_total = product
        .price()
        .checked_multiply_quantity(quantity)
        .ok_or_else(|| overflow("quantity"))?;

    Ok(LineItem {
        product_id: product.id.clone(),
        seller_id: product.seller_id.clone(),
        name: product.name.clone(),
        quantity,
        unit_price: product.price(),
        line_total,
    })
}

/// Sums line totals and applies the shipping policy.
///
/// Fails with `InvalidTotal` when the subtotal is not positive.
pub fn compute_totals(items: &[LineItem], shipping: &ShippingPolicy) -> CoreResult<OrderTotals> {
    let subtotal = items
        .iter()
        .try_fold(Money::zero(), |acc, item| acc.checked_add(item.line_total))
        .ok_or_else(|| overflow("items"))?;

    if !subtotal.is_positive() {
        return Err(CoreError::InvalidTotal { subtotal });
    }

    let fee = shipping.fee_for(subtotal);
    let grand_total = subtotal
        .checked_add(fee)
        .ok_or_else(|| overflow("items"))?;

    Ok(OrderTotals {
        subtotal,
        shipping: fee,
        grand_total,
    })
}

fn overflow(field: &str) -> CoreError {
    CoreError::Validation(ValidationError::OutOfRange {
        field: field.to_string(),
        min: 1,
        max: i64::MAX,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
