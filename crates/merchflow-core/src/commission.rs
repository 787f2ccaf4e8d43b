//! # Commission Tiers
//!
//! Order-value tiers that decide how much of an order the platform keeps.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Config "standard-v2"                                                   │
//! │                                                                         │
//! │   [0, 500]      → 15%                                                   │
//! │   [501, 2000]   → 12%    ◄── resolve_rate(1800) = 12%                   │
//! │   [2001, ∞)     →  8%                                                   │
//! │                                                                         │
//! │   partner earning = order total × (1 − rate)                            │
//! │   1800 × 0.88 = 1584                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bounds are whole currency units. A tier covers amounts from its `min`
//! up to (not including) `max + 1`, so 500.50 still resolves to the
//! `[0, 500]` tier.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, TierViolation};
use crate::money::{Money, Rate};
use crate::tier::{check_contiguous, TierRange};

/// Distance between one tier's max and the next tier's min.
pub const COMMISSION_BOUND_STEP: Decimal = Decimal::ONE;

// =============================================================================
// Types
// =============================================================================

/// One order-value band of a commission config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_order_value: Money,
    /// `None` means unbounded above.
    pub max_order_value: Option<Money>,
    pub rate: Rate,
    pub display_order: u32,
}

impl CommissionTier {
    pub fn new(min: Money, max: Option<Money>, rate: Rate, display_order: u32) -> Self {
        CommissionTier {
            min_order_value: min,
            max_order_value: max,
            rate,
            display_order,
        }
    }

    fn range(&self) -> TierRange {
        TierRange::new(
            self.min_order_value.amount(),
            self.max_order_value.map(|m| m.amount()),
        )
    }

    /// True when `amount` falls in this tier.
    pub fn contains(&self, amount: Money) -> bool {
        self.range().contains(amount.amount(), COMMISSION_BOUND_STEP)
    }
}

/// A named, versioned tier set. The config owns its tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionConfig {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub is_default: bool,
    pub is_active: bool,
    pub tiers: Vec<CommissionTier>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Validation
// =============================================================================

/// Validates a commission tier set.
///
/// ## Rules
/// - at least one tier
/// - lowest tier starts at 0
/// - neighbours meet exactly (`max + 1 == next.min`)
/// - only the highest tier omits its upper bound, and it must omit it
/// - bounds are whole currency units, rates are within 0-100%
///
/// Returns the tiers sorted by `min_order_value`.
pub fn validate_tier_set(tiers: &[CommissionTier]) -> CoreResult<Vec<CommissionTier>> {
    let mut sorted = tiers.to_vec();
    sorted.sort_by(|a, b| a.min_order_value.cmp(&b.min_order_value));

    for (index, tier) in sorted.iter().enumerate() {
        let fractional = !tier.min_order_value.is_whole()
            || tier.max_order_value.is_some_and(|m| !m.is_whole());
        if fractional {
            return Err(TierViolation::FractionalBound { index }.into());
        }
        if !tier.rate.is_valid_percentage() {
            return Err(TierViolation::RateOutOfRange {
                index,
                rate: tier.rate,
            }
            .into());
        }
    }

    let ranges: Vec<TierRange> = sorted.iter().map(CommissionTier::range).collect();
    check_contiguous(&ranges, Decimal::ZERO, COMMISSION_BOUND_STEP)?;

    Ok(sorted)
}

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of a rate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRate {
    pub rate: Rate,
    /// True when no tier matched and the fallback was used.
    pub fallback: bool,
}

/// Returns the rate of the first tier containing `order_amount`.
///
/// Never fails: an unmatched amount (impossible on a validated config)
/// gets `fallback` so settlement runs stay total.
pub fn resolve_rate(order_amount: Money, tiers: &[CommissionTier], fallback: Rate) -> ResolvedRate {
    tiers
        .iter()
        .find(|tier| tier.contains(order_amount))
        .map(|tier| ResolvedRate {
            rate: tier.rate,
            fallback: false,
        })
        .unwrap_or(ResolvedRate {
            rate: fallback,
            fallback: true,
        })
}

/// Partner's share of an order: `total × (1 − rate)`, unrounded.
pub fn partner_earning(order_total: Money, rate: Rate) -> Money {
    order_total.less_rate(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_tiers() -> Vec<CommissionTier> {
        vec![
            CommissionTier::new(Money::from_major(0), Some(Money::from_major(500)), Rate::from_percent(15), 1),
            CommissionTier::new(Money::from_major(501), Some(Money::from_major(2000)), Rate::from_percent(12), 2),
            CommissionTier::new(Money::from_major(2001), None, Rate::from_percent(8), 3),
        ]
    }

    #[test]
    fn test_resolves_middle_tier() {
        let resolved = resolve_rate(Money::from_major(1800), &standard_tiers(), Rate::from_percent(10));
        assert_eq!(resolved.rate, Rate::from_percent(12));
        assert!(!resolved.fallback);
    }

    #[test]
    fn test_boundaries() {
        let tiers = standard_tiers();
        let fallback = Rate::from_percent(10);
        assert_eq!(resolve_rate(Money::zero(), &tiers, fallback).rate, Rate::from_percent(15));
        assert_eq!(resolve_rate(Money::from_major(500), &tiers, fallback).rate, Rate::from_percent(15));
        assert_eq!(resolve_rate(Money::from_cents(50_050), &tiers, fallback).rate, Rate::from_percent(15));
        assert_eq!(resolve_rate(Money::from_major(501), &tiers, fallback).rate, Rate::from_percent(12));
        assert_eq!(resolve_rate(Money::from_major(2001), &tiers, fallback).rate, Rate::from_percent(8));
    }

    #[test]
    fn test_fallback_when_unmatched() {
        let tiers = vec![CommissionTier::new(
            Money::from_major(100),
            None,
            Rate::from_percent(5),
            1,
        )];
        let resolved = resolve_rate(Money::from_major(10), &tiers, Rate::from_percent(10));
        assert!(resolved.fallback);
        assert_eq!(resolved.rate, Rate::from_percent(10));
    }

    #[test]
    fn test_validated_set_covers_every_amount_exactly_once() {
        let tiers = validate_tier_set(&standard_tiers()).unwrap();
        for cents in (0..400_000).step_by(733) {
            let amount = Money::from_cents(cents);
            let matches = tiers.iter().filter(|t| t.contains(amount)).count();
            assert_eq!(matches, 1, "amount {} matched {} tiers", amount, matches);
        }
    }

    #[test]
    fn test_validation_sorts_and_rejects() {
        let mut shuffled = standard_tiers();
        shuffled.reverse();
        let sorted = validate_tier_set(&shuffled).unwrap();
        assert_eq!(sorted[0].min_order_value, Money::zero());

        let mut gap = standard_tiers();
        gap[1].min_order_value = Money::from_major(600);
        assert!(validate_tier_set(&gap).is_err());

        let mut fractional = standard_tiers();
        fractional[0].max_order_value = Some(Money::from_cents(50_050));
        assert!(validate_tier_set(&fractional).is_err());

        let mut too_high = standard_tiers();
        too_high[2].rate = Rate::from_bps(10_500);
        assert!(validate_tier_set(&too_high).is_err());

        assert!(validate_tier_set(&[]).is_err());
    }

    #[test]
    fn test_settlement_example() {
        let tiers = standard_tiers();
        let fallback = Rate::from_percent(10);
        let total: Money = [Money::from_major(1800), Money::from_major(3000)]
            .iter()
            .map(|t| partner_earning(*t, resolve_rate(*t, &tiers, fallback).rate))
            .sum();
        assert_eq!(total, Money::from_major(4344));
    }
}
