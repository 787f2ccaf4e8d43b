//! # Cart Aggregator
//!
//! One mutable basket per user. Every read and every mutation re-prices
//! the cart from the catalog and the active discounts; totals are never
//! cached.
//!
//! ## Checkout Validation
//! ```text
//! for each line:
//!   product missing ──────────► PRODUCT_UNAVAILABLE
//!   product inactive ─────────► PRODUCT_INACTIVE
//!   tiers miss quantity ──────► PRICING_UNAVAILABLE   (logged as integrity)
//!   effective price moved ────► PRICE_CHANGED         (prices_changed = true)
//!   quantity > available ─────► INSUFFICIENT_STOCK
//! ```
//! Lines are never removed automatically; the user decides.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use merchflow_core::cart::{
    plan_addition, price_issue, stock_issue, validate_quantity, Cart, CartAddition, CartIssue, CartItem,
    CartValidation,
};
use merchflow_core::pricing::{CartTotals, PricedLine, PricingEngine};
use merchflow_core::types::{DeliveryOption, Product};
use merchflow_core::{CoreError, Money};
use merchflow_db::repository::new_id;
use merchflow_db::Database;

use crate::discount::DiscountResolver;
use crate::error::{EngineError, EngineResult};
use crate::ports::Catalog;

// =============================================================================
// Views
// =============================================================================

/// One cart line as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item: CartItem,
    pub product_name: Option<String>,
    /// `None` when the line cannot be priced right now.
    pub priced: Option<PricedLine>,
}

/// Priced snapshot of a cart.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart_id: String,
    pub delivery_option: DeliveryOption,
    pub lines: Vec<CartLine>,
    /// Rounded for display.
    pub totals: CartTotals,
    pub validation: CartValidation,
}

/// A line with everything checkout needs to freeze it.
pub(crate) struct EvaluatedLine {
    pub item: CartItem,
    pub product: Option<Product>,
    pub priced: Option<PricedLine>,
}

pub(crate) struct Evaluation {
    pub lines: Vec<EvaluatedLine>,
    pub validation: CartValidation,
}

impl Evaluation {
    pub fn priced_lines(&self) -> Vec<PricedLine> {
        self.lines.iter().filter_map(|l| l.priced.clone()).collect()
    }
}

// =============================================================================
// Aggregator
// =============================================================================

#[derive(Clone)]
pub struct CartAggregator {
    db: Database,
    catalog: Arc<dyn Catalog>,
    discounts: DiscountResolver,
    pricing: PricingEngine,
}

impl CartAggregator {
    pub fn new(db: Database, catalog: Arc<dyn Catalog>, discounts: DiscountResolver, pricing: PricingEngine) -> Self {
        CartAggregator {
            db,
            catalog,
            discounts,
            pricing,
        }
    }

    pub async fn view(&self, user_id: &str, option: DeliveryOption) -> EngineResult<CartView> {
        let cart = self.db.carts().get_or_create(user_id).await?;
        let evaluation = self.evaluate(&cart, Utc::now()).await?;
        let totals = self.pricing.price_cart(&evaluation.priced_lines(), option).rounded();

        Ok(CartView {
            cart_id: cart.id,
            delivery_option: option,
            lines: evaluation
                .lines
                .into_iter()
                .map(|l| CartLine {
                    product_name: l.product.map(|p| p.name),
                    item: l.item,
                    priced: l.priced,
                })
                .collect(),
            totals,
            validation: evaluation.validation,
        })
    }

    /// Adds a line, or grows the line with the same product and
    /// customization.
    pub async fn add_item(
        &self,
        user_id: &str,
        product_id: &str,
        customization_id: Option<&str>,
        quantity: u32,
    ) -> EngineResult<CartView> {
        let product = self.sellable_product(product_id).await?;
        let cart = self.db.carts().get_or_create(user_id).await?;
        let now = Utc::now();

        match plan_addition(&cart, product_id, customization_id, quantity)? {
            CartAddition::NewLine { quantity } => {
                let unit = self.snapshot_price(&product, quantity, now).await?;
                let item = CartItem {
                    id: new_id(),
                    product_id: product_id.to_string(),
                    customization_id: customization_id.map(String::from),
                    quantity,
                    unit_price_at_add: unit,
                    added_at: now,
                    updated_at: now,
                };
                self.db.carts().insert_item(&cart.id, &item).await?;
                debug!(user_id = %user_id, product_id = %product_id, quantity, "Cart line added");
            }
            CartAddition::Merge { item_id, quantity } => {
                let unit = self.snapshot_price(&product, quantity, now).await?;
                self.db.carts().update_item(&cart.id, &item_id, quantity, unit).await?;
                debug!(user_id = %user_id, item_id = %item_id, quantity, "Cart line merged");
            }
        }

        self.view(user_id, DeliveryOption::default()).await
    }

    /// Sets a line's quantity and re-snapshots its price.
    pub async fn update_quantity(&self, user_id: &str, item_id: &str, quantity: u32) -> EngineResult<CartView> {
        validate_quantity(quantity)?;
        let cart = self.owned_cart(user_id).await?;
        let item = cart
            .item(item_id)
            .ok_or_else(|| EngineError::not_found("CartItem", item_id))?;

        let product = self.sellable_product(&item.product_id).await?;
        let unit = self.snapshot_price(&product, quantity, Utc::now()).await?;
        if !self.db.carts().update_item(&cart.id, item_id, quantity, unit).await? {
            return Err(EngineError::not_found("CartItem", item_id));
        }

        self.view(user_id, DeliveryOption::default()).await
    }

    pub async fn remove_item(&self, user_id: &str, item_id: &str) -> EngineResult<CartView> {
        let cart = self.owned_cart(user_id).await?;
        if !self.db.carts().remove_item(&cart.id, item_id).await? {
            return Err(EngineError::not_found("CartItem", item_id));
        }
        self.view(user_id, DeliveryOption::default()).await
    }

    pub async fn clear(&self, user_id: &str) -> EngineResult<CartView> {
        let cart = self.db.carts().get_or_create(user_id).await?;
        self.db.carts().clear(&cart.id).await?;
        self.view(user_id, DeliveryOption::default()).await
    }

    /// Per-line issues plus the prices-changed flag. Never mutates the cart.
    pub async fn validate_for_checkout(&self, user_id: &str) -> EngineResult<CartValidation> {
        let cart = self.db.carts().get_or_create(user_id).await?;
        Ok(self.evaluate(&cart, Utc::now()).await?.validation)
    }

    /// Accepts current prices for every line flagged PRICE_CHANGED.
    pub async fn accept_price_changes(&self, user_id: &str) -> EngineResult<CartView> {
        let cart = self.owned_cart(user_id).await?;
        let evaluation = self.evaluate(&cart, Utc::now()).await?;

        for issue in &evaluation.validation.issues {
            if let CartIssue::PriceChanged { current, .. } = &issue.issue {
                if let Some(line) = evaluation.lines.iter().find(|l| l.item.id == issue.item_id) {
                    self.db
                        .carts()
                        .update_item(&cart.id, &line.item.id, line.item.quantity, *current)
                        .await?;
                }
            }
        }

        self.view(user_id, DeliveryOption::default()).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn owned_cart(&self, user_id: &str) -> EngineResult<Cart> {
        self.db
            .carts()
            .get_for_user(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cart", user_id))
    }

    async fn sellable_product(&self, product_id: &str) -> EngineResult<Product> {
        match self.catalog.get_product(product_id).await? {
            Some(product) if product.is_active => Ok(product),
            _ => Err(EngineError::ProductUnavailable {
                product_id: product_id.to_string(),
            }),
        }
    }

    /// Effective unit price at the persisted scale.
    async fn snapshot_price(&self, product: &Product, quantity: u32, now: DateTime<Utc>) -> EngineResult<Money> {
        let discount = self.discounts.active_discount_for(&product.id, now).await?;
        let line = self.pricing.price_line(product, quantity, discount.as_ref(), now)?;
        Ok(line.effective_unit_price.rounded())
    }

    /// Re-resolves every line against the catalog, discounts and stock.
    pub(crate) async fn evaluate(&self, cart: &Cart, now: DateTime<Utc>) -> EngineResult<Evaluation> {
        let mut validation = CartValidation::default();
        let mut lines = Vec::with_capacity(cart.items.len());

        for item in &cart.items {
            let product = self.catalog.get_product(&item.product_id).await?;

            let priced = match &product {
                None => {
                    validation.push(item, CartIssue::ProductUnavailable);
                    None
                }
                Some(product) => {
                    if !product.is_active {
                        validation.push(item, CartIssue::ProductInactive);
                    }

                    let discount = self.discounts.active_discount_for(&product.id, now).await?;
                    let priced = match self.pricing.price_line(product, item.quantity, discount.as_ref(), now) {
                        Ok(line) => Some(line),
                        Err(CoreError::TierCoverage { product_id, quantity }) => {
                            error!(product_id = %product_id, quantity, "Pricing tiers do not cover cart quantity");
                            validation.push(item, CartIssue::PricingUnavailable);
                            None
                        }
                        Err(other) => return Err(other.into()),
                    };

                    if let Some(line) = &priced {
                        if let Some(issue) = price_issue(item, line.effective_unit_price) {
                            validation.push(item, issue);
                        }
                    }
                    if product.track_inventory {
                        let available = self.catalog.available_stock(&product.id).await?;
                        if let Some(issue) = stock_issue(item, available) {
                            validation.push(item, issue);
                        }
                    }
                    priced
                }
            };

            lines.push(EvaluatedLine {
                item: item.clone(),
                product,
                priced,
            });
        }

        Ok(Evaluation { lines, validation })
    }
}
