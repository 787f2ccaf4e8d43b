//! # Money Module
//!
//! Provides the `Money` and `Rate` types for handling monetary values safely.
//!
//! ## Exact Decimals, Late Rounding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WHERE ROUNDING HAPPENS                                                 │
//! │                                                                         │
//! │  tier price ──► × (1 - discount) ──► × qty ──► Σ lines ──► + GST       │
//! │     exact           exact              exact     exact       exact      │
//! │                                                                  │      │
//! │                                                                  ▼      │
//! │                                       persist / display boundary       │
//! │                                       round half-up to 2 places        │
//! │                                                                         │
//! │  Intermediate values are never rounded, so a 3-way discount split      │
//! │  followed by GST does not compound paisa-level error.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use merchflow_core::money::{Money, Rate};
//!
//! let unit = Money::from_major(100);
//! let line = unit * 12u32;
//! let discounted = line.less_rate(Rate::from_percent(10));
//! assert_eq!(discounted.to_cents(), 108_000);
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// Number of decimal places persisted for every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Basis points in one whole (100%).
pub const BPS_PER_WHOLE: u32 = 10_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount held as an exact decimal.
///
/// ## Design Decisions
/// - **Decimal, not f64**: `0.1 + 0.2` is exactly `0.3`
/// - **Unrounded internally**: only [`Money::rounded`] and [`Money::to_cents`]
///   apply the 2-place half-up rule
/// - **Signed**: negative values appear only as intermediate differences
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Creates a Money value from minor units (paisa).
    ///
    /// ```rust
    /// use merchflow_core::money::Money;
    ///
    /// let price = Money::from_cents(109_950);
    /// assert_eq!(price.to_string(), "₹1099.50");
    /// ```
    #[inline]
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, MONEY_SCALE))
    }

    /// Creates a Money value from whole currency units.
    #[inline]
    pub fn from_major(major: i64) -> Self {
        Money(Decimal::from(major))
    }

    /// Wraps an existing decimal without rounding.
    #[inline]
    pub const fn from_decimal(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Returns the exact underlying decimal.
    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// True when the amount has no fractional part.
    #[inline]
    pub fn is_whole(&self) -> bool {
        self.0.fract().is_zero()
    }

    /// Rounds half-up (away from zero) to two decimal places.
    ///
    /// This is the persist/display boundary. Nothing inside the pricing
    /// pipeline calls it.
    ///
    /// ```rust
    /// use merchflow_core::money::Money;
    /// use rust_decimal::Decimal;
    ///
    /// let m = Money::from_decimal(Decimal::new(10_005, 3)); // 10.005
    /// assert_eq!(m.rounded().to_cents(), 1001);
    /// ```
    pub fn rounded(&self) -> Money {
        let mut value = self
            .0
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(MONEY_SCALE);
        Money(value)
    }

    /// Returns the rounded amount in minor units.
    ///
    /// Saturates at the `i64` range, which is far beyond any order value.
    pub fn to_cents(&self) -> i64 {
        let scaled = self.rounded().0 * Decimal::ONE_HUNDRED;
        scaled.to_i64().unwrap_or(if scaled.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Multiplies by a rate without rounding (`self × rate`).
    #[inline]
    pub fn portion(&self, rate: Rate) -> Money {
        Money(self.0 * rate.as_fraction())
    }

    /// Multiplies by the complement of a rate (`self × (1 − rate)`).
    #[inline]
    pub fn less_rate(&self, rate: Rate) -> Money {
        Money(self.0 * rate.complement_fraction())
    }

    /// Returns the larger of two amounts.
    #[inline]
    pub fn max(self, other: Money) -> Money {
        if self >= other {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = self.rounded().0;
        if rounded.is_sign_negative() && !rounded.is_zero() {
            write!(f, "-₹{}", rounded.abs())
        } else {
            write!(f, "₹{}", rounded.abs())
        }
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

/// Multiplication by a quantity.
impl Mul<u32> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: u32) -> Self {
        Money(self.0 * Decimal::from(qty))
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * Decimal::from(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Rate
// =============================================================================

/// A percentage represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 1500 bps = 15%. Commission rates, discount
/// percentages, GST and cancellation deductions all use this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Rate(bps)
    }

    /// Creates a rate from a whole percentage (`from_percent(12)` = 12%).
    #[inline]
    pub const fn from_percent(pct: u32) -> Self {
        Rate(pct * 100)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Rate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True when the rate lies in `[0%, 100%]`.
    #[inline]
    pub const fn is_valid_percentage(&self) -> bool {
        self.0 <= BPS_PER_WHOLE
    }

    /// The rate as a percentage decimal (1250 bps → 12.50).
    #[inline]
    pub fn percentage(&self) -> Decimal {
        Decimal::new(i64::from(self.0), 2)
    }

    /// The rate as a fraction of one (1250 bps → 0.1250).
    #[inline]
    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(i64::from(self.0), 4)
    }

    /// `1 − rate` as a fraction. Rates above 100% yield a negative value.
    #[inline]
    pub fn complement_fraction(&self) -> Decimal {
        Decimal::ONE - self.as_fraction()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percentage())
    }
}

impl Default for Rate {
    fn default() -> Self {
        Rate::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_cents_and_major() {
        assert_eq!(Money::from_cents(150_000), Money::from_major(1500));
        assert_eq!(Money::from_cents(1099).amount(), dec!(10.99));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "₹10.99");
        assert_eq!(Money::from_major(5).to_string(), "₹5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-₹5.50");
        assert_eq!(Money::zero().to_string(), "₹0.00");
    }

    #[test]
    fn test_round_half_up_at_boundary() {
        assert_eq!(Money::from_decimal(dec!(0.125)).to_cents(), 13);
        assert_eq!(Money::from_decimal(dec!(0.124)).to_cents(), 12);
        assert_eq!(Money::from_decimal(dec!(2.675)).to_cents(), 268);
        // 2.5 paisa rounds away from zero, not to even
        assert_eq!(Money::from_decimal(dec!(0.025)).to_cents(), 3);
    }

    #[test]
    fn test_no_intermediate_rounding() {
        // Three lines of 33.335 each: rounding per line would give 100.02
        let line = Money::from_decimal(dec!(33.335));
        let total: Money = [line, line, line].iter().sum();
        assert_eq!(total.to_cents(), 10_001);
    }

    #[test]
    fn test_rate_fractions() {
        let rate = Rate::from_percent(12);
        assert_eq!(rate.bps(), 1200);
        assert_eq!(rate.as_fraction(), dec!(0.12));
        assert_eq!(rate.complement_fraction(), dec!(0.88));
        assert_eq!(Rate::from_bps(1250).to_string(), "12.50%");
    }

    #[test]
    fn test_portion_and_less_rate() {
        let amount = Money::from_major(1800);
        assert_eq!(amount.less_rate(Rate::from_percent(12)), Money::from_major(1584));
        assert_eq!(amount.portion(Rate::from_percent(12)), Money::from_major(216));
    }

    #[test]
    fn test_rate_validity() {
        assert!(Rate::from_percent(100).is_valid_percentage());
        assert!(!Rate::from_bps(10_001).is_valid_percentage());
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&Rate::from_bps(1500)).unwrap();
        assert_eq!(json, "1500");
    }
}
