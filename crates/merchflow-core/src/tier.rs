//! # Tier Ranges
//!
//! Shared contiguity rules for commission tiers (order value) and product
//! pricing tiers (quantity).
//!
//! ```text
//!   floor                                                       ∞
//!     ├──────── tier 0 ────────┤├──── tier 1 ────┤├──── tier 2 ────►
//!     min₀                  max₀ min₁=max₀+step  max₁  min₂=max₁+step
//! ```
//!
//! A set is valid when it starts at the floor, each tier's `max + step`
//! equals the next tier's `min`, and only the highest tier is unbounded.

use rust_decimal::Decimal;

use crate::error::TierViolation;

/// A single `[min, max]` range; `max = None` means unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierRange {
    pub min: Decimal,
    pub max: Option<Decimal>,
}

impl TierRange {
    pub fn new(min: Decimal, max: Option<Decimal>) -> Self {
        TierRange { min, max }
    }

    /// Inclusive containment at the tier's own granularity.
    ///
    /// With `step = 1`, the range `[0, 500]` contains `500.50`: the range
    /// extends up to (not including) `max + step`, which is where the next
    /// tier begins.
    pub fn contains(&self, value: Decimal, step: Decimal) -> bool {
        if value < self.min {
            return false;
        }
        match self.max {
            None => true,
            Some(max) => value < max + step,
        }
    }
}

/// Checks a range set sorted by `min`.
///
/// Callers sort before calling; the index in any violation refers to the
/// sorted position.
pub fn check_contiguous(
    ranges: &[TierRange],
    floor: Decimal,
    step: Decimal,
) -> Result<(), TierViolation> {
    let first = ranges.first().ok_or(TierViolation::Empty)?;

    if first.min != floor {
        return Err(TierViolation::DoesNotStartAtFloor {
            min: first.min.to_string(),
            expected: floor.to_string(),
        });
    }

    let last_index = ranges.len() - 1;
    for (index, range) in ranges.iter().enumerate() {
        match range.max {
            None if index != last_index => {
                return Err(TierViolation::UnboundedNotLast { index });
            }
            None => {}
            Some(max) => {
                if max < range.min {
                    return Err(TierViolation::InvertedRange { index });
                }
                if index == last_index {
                    return Err(TierViolation::LastTierBounded);
                }
                let next_min = ranges[index + 1].min;
                let expected = max + step;
                if next_min > expected {
                    return Err(TierViolation::Gap {
                        index,
                        max: max.to_string(),
                        next_min: next_min.to_string(),
                    });
                }
                if next_min < expected {
                    return Err(TierViolation::Overlap {
                        index,
                        max: max.to_string(),
                        next_min: next_min.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn r(min: Decimal, max: Option<Decimal>) -> TierRange {
        TierRange::new(min, max)
    }

    #[test]
    fn test_valid_set() {
        let ranges = [
            r(dec!(0), Some(dec!(500))),
            r(dec!(501), Some(dec!(2000))),
            r(dec!(2001), None),
        ];
        assert!(check_contiguous(&ranges, dec!(0), dec!(1)).is_ok());
    }

    #[test]
    fn test_violations() {
        let floor = dec!(0);
        let step = dec!(1);

        assert_eq!(check_contiguous(&[], floor, step), Err(TierViolation::Empty));

        let gap = [r(dec!(0), Some(dec!(500))), r(dec!(600), None)];
        assert!(matches!(
            check_contiguous(&gap, floor, step),
            Err(TierViolation::Gap { index: 0, .. })
        ));

        let overlap = [r(dec!(0), Some(dec!(500))), r(dec!(400), None)];
        assert!(matches!(
            check_contiguous(&overlap, floor, step),
            Err(TierViolation::Overlap { index: 0, .. })
        ));

        let unbounded_middle = [r(dec!(0), None), r(dec!(501), None)];
        assert_eq!(
            check_contiguous(&unbounded_middle, floor, step),
            Err(TierViolation::UnboundedNotLast { index: 0 })
        );

        let bounded_last = [r(dec!(0), Some(dec!(500)))];
        assert_eq!(
            check_contiguous(&bounded_last, floor, step),
            Err(TierViolation::LastTierBounded)
        );

        let wrong_floor = [r(dec!(10), None)];
        assert!(matches!(
            check_contiguous(&wrong_floor, floor, step),
            Err(TierViolation::DoesNotStartAtFloor { .. })
        ));
    }

    #[test]
    fn test_contains_uses_step() {
        let tier = r(dec!(0), Some(dec!(500)));
        assert!(tier.contains(dec!(500), dec!(1)));
        assert!(tier.contains(dec!(500.99), dec!(1)));
        assert!(!tier.contains(dec!(501), dec!(1)));
        assert!(r(dec!(2001), None).contains(dec!(1000000), dec!(1)));
    }
}
