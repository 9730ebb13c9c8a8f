//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Paisa?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  A gateway signature over "550.0000000001" never verifies.             │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Paisa (1 NPR = 100 paisa)                       │
//! │    Rs. 550.00 = 55000 paisa, formatted exactly as "550.00"             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use doko_core::money::Money;
//!
//! let price = Money::from_paisa(12_050);          // Rs. 120.50
//! let line = price.multiply_quantity(2);           // Rs. 241.00
//! assert_eq!(line.to_amount_string(), "241.00");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in paisa (the smallest NPR unit).
///
/// ## Design Decisions
/// - **i64 (signed)**: differences (remaining balance) can be computed freely
/// - **Single field tuple struct**: serializes as a bare integer in JSON
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Product.price_paisa ──► LineItem.unit_price (snapshot)                 │
/// │                               │                                         │
/// │                               ▼                                         │
/// │                     LineItem.line_total ──► OrderTotals.subtotal        │
/// │                                                   │                     │
/// │                               shipping fee ──────►│                     │
/// │                                                   ▼                     │
/// │                        OrderTotals.grand_total ──► Transaction.amount   │
/// │                                                   │                     │
/// │                                                   ▼                     │
/// │                               "550.00" in the signed gateway payload    │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from paisa.
    ///
    /// ```rust
    /// use doko_core::money::Money;
    ///
    /// let price = Money::from_paisa(1099); // Rs. 10.99
    /// assert_eq!(price.paisa(), 1099);
    /// ```
    #[inline]
    pub const fn from_paisa(paisa: i64) -> Self {
        Money(paisa)
    }

    /// Creates a Money value from whole rupees.
    #[inline]
    pub const fn from_rupees(rupees: i64) -> Self {
        Money(rupees * 100)
    }

    /// Creates a Money value from rupees and paisa.
    ///
    /// ```rust
    /// use doko_core::money::Money;
    ///
    /// assert_eq!(Money::from_rupees_paisa(10, 99).paisa(), 1099);
    /// assert_eq!(Money::from_rupees_paisa(-5, 50).paisa(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the rupee part should be negative.
    #[inline]
    pub const fn from_rupees_paisa(rupees: i64, paisa: i64) -> Self {
        if rupees < 0 {
            Money(rupees * 100 - paisa)
        } else {
            Money(rupees * 100 + paisa)
        }
    }

    /// Returns the value in paisa.
    #[inline]
    pub const fn paisa(&self) -> i64 {
        self.0
    }

    /// Returns the whole-rupee portion.
    #[inline]
    pub const fn rupees(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the paisa portion (always 0-99).
    #[inline]
    pub const fn paisa_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    ///
    /// ```rust
    /// use doko_core::money::Money;
    ///
    /// let per_kg = Money::from_paisa(8_000); // Rs. 80/kg
    /// assert_eq!(per_kg.multiply_quantity(3).paisa(), 24_000);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        self.0.checked_mul(qty).map(Money)
    }

    /// Adds two values, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Self> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Formats the amount with exactly two decimals and no currency symbol.
    ///
    /// This is the representation signed into gateway payloads, so it must
    /// be byte-for-byte stable.
    ///
    /// ```rust
    /// use doko_core::money::Money;
    ///
    /// assert_eq!(Money::from_rupees(100).to_amount_string(), "100.00");
    /// assert_eq!(Money::from_paisa(5).to_amount_string(), "0.05");
    /// ```
    pub fn to_amount_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.rupees().abs(), self.paisa_part())
    }

    /// Parses a two-decimal amount string (as echoed back by gateways).
    ///
    /// Accepts `"550"`, `"550.0"`, `"550.00"` and thousands separators
    /// (`"1,100.00"`). Returns `None` on anything else.
    pub fn parse_amount(raw: &str) -> Option<Self> {
        let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
        let (whole, frac) = match cleaned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (cleaned.as_str(), ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return None;
        }
        let rupees: i64 = whole.parse().ok()?;
        let paisa: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        if rupees < 0 {
            return None;
        }
        Some(Money::from_rupees_paisa(rupees, paisa))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Human-readable NPR formatting, e.g. `Rs. 550.00`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}Rs. {}.{:02}",
            sign,
            self.rupees().abs(),
            self.paisa_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
