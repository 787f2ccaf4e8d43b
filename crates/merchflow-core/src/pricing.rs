//! # Pricing Engine
//!
//! Turns products, quantities and discounts into priced lines and totals.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  price_line(product, qty, discount)                                     │
//! │     tier unit price ──► × (1 − discount) ──► × qty = line subtotal      │
//! │                                                                         │
//! │  price_cart(lines, delivery option)                                     │
//! │     original_subtotal = Σ unit × qty                                    │
//! │     subtotal          = Σ line subtotal                                 │
//! │     total_discount    = original_subtotal − subtotal                    │
//! │     gst               = subtotal × gst rate                             │
//! │     delivery          = 0 if subtotal ≥ threshold, else option fee      │
//! │     total             = subtotal + gst + delivery                       │
//! │                                                                         │
//! │  Everything stays exact until `CartTotals::rounded()`, which rounds     │
//! │  the components and re-derives discount and total from them.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is a pure function of its rules and inputs. Calling it twice
//! with the same inputs returns identical output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discount::Discount;
use crate::error::CoreResult;
use crate::money::{Money, Rate};
use crate::types::{DeliveryOption, Product};

// =============================================================================
// Rules
// =============================================================================

/// Tax and delivery rules applied to every cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRules {
    pub gst_rate: Rate,
    /// Seller's state; same-state deliveries split GST into CGST + SGST.
    pub origin_state: String,
    pub free_delivery_threshold: Money,
    pub standard_delivery_fee: Money,
    pub express_delivery_fee: Money,
}

impl PricingRules {
    pub fn flat_fee(&self, option: DeliveryOption) -> Money {
        match option {
            DeliveryOption::Standard => self.standard_delivery_fee,
            DeliveryOption::Express => self.express_delivery_fee,
        }
    }
}

impl Default for PricingRules {
    fn default() -> Self {
        PricingRules {
            gst_rate: Rate::from_percent(18),
            origin_state: "Karnataka".to_string(),
            free_delivery_threshold: Money::from_major(999),
            standard_delivery_fee: Money::from_major(49),
            express_delivery_fee: Money::from_major(149),
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// One priced line. Amounts are exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: String,
    pub quantity: u32,
    pub original_unit_price: Money,
    /// Applied discount, if an active one was supplied.
    pub discount_rate: Option<Rate>,
    pub discount_id: Option<String>,
    pub effective_unit_price: Money,
    pub original_line_total: Money,
    pub line_subtotal: Money,
}

/// Cart level totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub original_subtotal: Money,
    pub subtotal: Money,
    pub total_discount: Money,
    pub gst: Money,
    pub delivery_charge: Money,
    pub total: Money,
}

impl CartTotals {
    /// Applies the 2-place half-up rule to the components, then derives
    /// the discount and total from the rounded values so stored figures
    /// always add up.
    pub fn rounded(&self) -> CartTotals {
        let original_subtotal = self.original_subtotal.rounded();
        let subtotal = self.subtotal.rounded();
        let gst = self.gst.rounded();
        let delivery_charge = self.delivery_charge.rounded();
        CartTotals {
            original_subtotal,
            subtotal,
            total_discount: original_subtotal - subtotal,
            gst,
            delivery_charge,
            total: subtotal + gst + delivery_charge,
        }
    }
}

/// How GST is booked for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GstSplit {
    pub cgst: Money,
    pub sgst: Money,
    pub igst: Money,
}

impl GstSplit {
    /// Rounded split that always sums to the rounded GST.
    ///
    /// Same-state: CGST gets the rounded half, SGST the remainder.
    /// Inter-state: everything is IGST.
    pub fn for_states(gst: Money, origin_state: &str, destination_state: &str) -> GstSplit {
        let gst = gst.rounded();
        if origin_state.trim().eq_ignore_ascii_case(destination_state.trim()) {
            let cgst = Money::from_decimal(gst.amount() / rust_decimal::Decimal::TWO).rounded();
            GstSplit {
                cgst,
                sgst: gst - cgst,
                igst: Money::zero(),
            }
        } else {
            GstSplit {
                cgst: Money::zero(),
                sgst: Money::zero(),
                igst: gst,
            }
        }
    }

    pub fn total(&self) -> Money {
        self.cgst + self.sgst + self.igst
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    rules: PricingRules,
}

impl PricingEngine {
    pub fn new(rules: PricingRules) -> Self {
        PricingEngine { rules }
    }

    pub fn rules(&self) -> &PricingRules {
        &self.rules
    }

    /// Prices one line.
    ///
    /// The discount is applied only when it is active at `now`. Fails with
    /// `TierCoverage` when no tier covers `quantity`.
    pub fn price_line(
        &self,
        product: &Product,
        quantity: u32,
        discount: Option<&Discount>,
        now: DateTime<Utc>,
    ) -> CoreResult<PricedLine> {
        let unit = product.unit_price_for(quantity)?;
        let applied = discount.filter(|d| d.is_active_at(now) && d.product_id == product.id);

        let effective = match applied {
            Some(d) => unit.less_rate(d.rate),
            None => unit,
        };

        Ok(PricedLine {
            product_id: product.id.clone(),
            quantity,
            original_unit_price: unit,
            discount_rate: applied.map(|d| d.rate),
            discount_id: applied.map(|d| d.id.clone()),
            effective_unit_price: effective,
            original_line_total: unit * quantity,
            line_subtotal: effective * quantity,
        })
    }

    /// Aggregates priced lines into cart totals.
    pub fn price_cart(&self, lines: &[PricedLine], option: DeliveryOption) -> CartTotals {
        let original_subtotal: Money = lines.iter().map(|l| l.original_line_total).sum();
        let subtotal: Money = lines.iter().map(|l| l.line_subtotal).sum();
        let gst = subtotal.portion(self.rules.gst_rate);
        let delivery_charge = if lines.is_empty() {
            Money::zero()
        } else {
            self.delivery_charge(subtotal, option)
        };

        CartTotals {
            original_subtotal,
            subtotal,
            total_discount: original_subtotal - subtotal,
            gst,
            delivery_charge,
            total: subtotal + gst + delivery_charge,
        }
    }

    /// Free at or above the threshold, otherwise the option's flat fee.
    pub fn delivery_charge(&self, subtotal: Money, option: DeliveryOption) -> Money {
        if subtotal >= self.rules.free_delivery_threshold {
            Money::zero()
        } else {
            self.rules.flat_fee(option)
        }
    }

    pub fn split_gst(&self, gst: Money, destination_state: &str) -> GstSplit {
        GstSplit::for_states(gst, &self.rules.origin_state, destination_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::{DiscountStatus, DiscountWindow};
    use crate::types::PricingTier;
    use chrono::Duration;

    fn product() -> Product {
        Product {
            id: "tee".into(),
            name: "Team Tee".into(),
            partner_id: "partner-1".into(),
            category: "apparel".into(),
            tax_category: "6109".into(),
            base_price: Money::from_major(150),
            tiers: vec![
                PricingTier::new(1, Some(9), Money::from_major(150)),
                PricingTier::new(10, None, Money::from_major(100)),
            ],
            is_active: true,
            track_inventory: false,
            stock: None,
            updated_at: Utc::now(),
        }
    }

    fn ten_percent(status: DiscountStatus, window: DiscountWindow) -> Discount {
        Discount {
            id: "d1".into(),
            product_id: "tee".into(),
            partner_id: "partner-1".into(),
            rate: Rate::from_percent(10),
            window,
            status,
            terms_accepted: true,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_cart_with_active_discount() {
        let engine = PricingEngine::default();
        let discount = ten_percent(DiscountStatus::Approved, DiscountWindow::always());
        let line = engine
            .price_line(&product(), 12, Some(&discount), Utc::now())
            .unwrap();

        assert_eq!(line.original_unit_price, Money::from_major(100));
        assert_eq!(line.effective_unit_price, Money::from_major(90));

        let totals = engine.price_cart(&[line], DeliveryOption::Standard);
        assert_eq!(totals.original_subtotal, Money::from_major(1200));
        assert_eq!(totals.subtotal, Money::from_major(1080));
        assert_eq!(totals.total_discount, Money::from_major(120));
    }

    #[test]
    fn test_inactive_discount_ignored() {
        let engine = PricingEngine::default();
        let now = Utc::now();
        let expired = ten_percent(
            DiscountStatus::Approved,
            DiscountWindow::new(None, Some(now - Duration::days(1))),
        );
        let line = engine.price_line(&product(), 12, Some(&expired), now).unwrap();
        assert_eq!(line.discount_rate, None);
        assert_eq!(line.line_subtotal, Money::from_major(1200));

        let pending = ten_percent(DiscountStatus::Pending, DiscountWindow::always());
        let line = engine.price_line(&product(), 12, Some(&pending), now).unwrap();
        assert_eq!(line.effective_unit_price, Money::from_major(100));
    }

    #[test]
    fn test_gst_and_delivery() {
        let engine = PricingEngine::default();
        let now = Utc::now();

        // 2 × 150 = 300 → below threshold, standard fee 49
        let small = engine.price_line(&product(), 2, None, now).unwrap();
        let totals = engine.price_cart(&[small], DeliveryOption::Standard);
        assert_eq!(totals.gst, Money::from_major(54));
        assert_eq!(totals.delivery_charge, Money::from_major(49));
        assert_eq!(totals.total, Money::from_major(403));

        let small = engine.price_line(&product(), 2, None, now).unwrap();
        let express = engine.price_cart(&[small], DeliveryOption::Express);
        assert_eq!(express.delivery_charge, Money::from_major(149));

        // 12 × 100 = 1200 → free delivery
        let big = engine.price_line(&product(), 12, None, now).unwrap();
        let totals = engine.price_cart(&[big], DeliveryOption::Express);
        assert!(totals.delivery_charge.is_zero());
        assert_eq!(totals.total, Money::from_major(1416));
    }

    #[test]
    fn test_pricing_is_deterministic() {
        let engine = PricingEngine::default();
        let now = Utc::now();
        let discount = ten_percent(DiscountStatus::Approved, DiscountWindow::always());
        let run = || {
            let line = engine.price_line(&product(), 7, Some(&discount), now).unwrap();
            engine.price_cart(&[line], DeliveryOption::Standard)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_gst_split() {
        let gst = Money::from_cents(10_001);
        let intra = GstSplit::for_states(gst, "Karnataka", "karnataka");
        assert_eq!(intra.cgst.to_cents(), 5001);
        assert_eq!(intra.sgst.to_cents(), 5000);
        assert_eq!(intra.total(), gst);

        let inter = GstSplit::for_states(gst, "Karnataka", "Kerala");
        assert_eq!(inter.igst, gst);
        assert!(inter.cgst.is_zero());
    }

    #[test]
    fn test_empty_cart_has_no_delivery_charge() {
        let totals = PricingEngine::default().price_cart(&[], DeliveryOption::Standard);
        assert!(totals.total.is_zero());
    }

    #[test]
    fn test_rounded_totals_add_up() {
        use rust_decimal::Decimal;

        let exact = CartTotals {
            original_subtotal: Money::from_decimal(Decimal::new(11_115, 3)),
            subtotal: Money::from_decimal(Decimal::new(10_004, 3)),
            total_discount: Money::from_decimal(Decimal::new(1_111, 3)),
            gst: Money::from_decimal(Decimal::new(1_004, 3)),
            delivery_charge: Money::from_major(49),
            total: Money::from_decimal(Decimal::new(60_008, 3)),
        };
        let rounded = exact.rounded();
        assert_eq!(rounded.subtotal.to_cents(), 1000);
        assert_eq!(rounded.gst.to_cents(), 100);
        assert_eq!(rounded.total.to_cents(), 6000);
        assert_eq!(rounded.total, rounded.subtotal + rounded.gst + rounded.delivery_charge);
        assert_eq!(rounded.total_discount, rounded.original_subtotal - rounded.subtotal);
    }
}
