//! # Discount Resolver
//!
//! Partner proposals, operator review and the active-discount lookup used
//! by pricing.
//!
//! ```text
//!   propose ──► PENDING ──approve──► APPROVED ──disable──► DISABLED
//!                  │                                          ▲
//!                  └───────────────disable────────────────────┘
//! ```
//!
//! Approval runs inside a write transaction, so two approvals for the same
//! product are serialized and cannot both see "no active discount".

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use merchflow_core::discount::{
    conflicting_approvals, resolve_limit, select_active, validate_proposal, Discount, DiscountLimit,
    DiscountProposal, DiscountStatus,
};
use merchflow_core::types::Actor;
use merchflow_core::{CoreError, ValidationError};
use merchflow_db::repository::new_id;
use merchflow_db::Database;

use crate::error::{EngineError, EngineResult};
use crate::ports::Catalog;
use crate::{audit_entry, snapshot};

#[derive(Clone)]
pub struct DiscountResolver {
    db: Database,
    catalog: Arc<dyn Catalog>,
    builtin_limit: DiscountLimit,
}

impl DiscountResolver {
    pub fn new(db: Database, catalog: Arc<dyn Catalog>, builtin_limit: DiscountLimit) -> Self {
        DiscountResolver {
            db,
            catalog,
            builtin_limit,
        }
    }

    /// The discount pricing should apply to `product_id` at `now`.
    pub async fn active_discount_for(&self, product_id: &str, now: DateTime<Utc>) -> EngineResult<Option<Discount>> {
        let approved = self.db.discounts().list_approved(product_id).await?;
        Ok(select_active(&approved, now).cloned())
    }

    /// Creates a PENDING discount for one of the partner's own products.
    pub async fn propose(&self, partner_id: &str, proposal: DiscountProposal) -> EngineResult<Discount> {
        let product = self
            .catalog
            .get_product(&proposal.product_id)
            .await?
            .filter(|p| p.partner_id == partner_id)
            .ok_or_else(|| EngineError::not_found("Product", proposal.product_id.as_str()))?;

        let limits = self.db.discounts().list_limits().await?;
        let limit = resolve_limit(&limits, &product.category, &self.builtin_limit);
        validate_proposal(&proposal, &limit)?;

        let now = Utc::now();
        let discount = Discount {
            id: new_id(),
            product_id: product.id.clone(),
            partner_id: partner_id.to_string(),
            rate: proposal.rate,
            window: proposal.window,
            status: DiscountStatus::Pending,
            terms_accepted: proposal.terms_accepted,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut tx = self.db.begin_write().await?;
        self.db.discounts().insert_tx(&mut tx, &discount).await?;
        self.db
            .audit()
            .record_tx(
                &mut tx,
                &audit_entry(
                    "discount.propose",
                    "discount",
                    &discount.id,
                    &Actor::Partner(partner_id.to_string()),
                    None,
                    snapshot(&discount),
                    now,
                ),
            )
            .await?;
        tx.commit().await?;

        info!(discount_id = %discount.id, product_id = %discount.product_id, rate = %discount.rate, "Discount proposed");
        Ok(discount)
    }

    /// PENDING → APPROVED.
    ///
    /// An approved discount with an overlapping window blocks approval
    /// unless `supersede` is set, in which case it is disabled first.
    pub async fn approve(&self, actor: &Actor, discount_id: &str, supersede: bool) -> EngineResult<Discount> {
        let repo = self.db.discounts();
        let audit = self.db.audit();
        let now = Utc::now();
        let reviewer = actor.label();

        let mut tx = self.db.begin_write().await?;
        let candidate = repo
            .get_tx(&mut tx, discount_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Discount", discount_id))?;
        candidate.ensure_can_approve()?;

        let same_product = repo.list_for_product_tx(&mut tx, &candidate.product_id).await?;
        let conflicts = conflicting_approvals(&candidate, &same_product);

        if let Some(first) = conflicts.first() {
            if !supersede {
                return Err(CoreError::DiscountAlreadyActive {
                    product_id: candidate.product_id.clone(),
                    active_discount_id: first.id.clone(),
                }
                .into());
            }
        }

        for old in conflicts {
            if !repo
                .update_status_tx(&mut tx, &old.id, DiscountStatus::Approved, DiscountStatus::Disabled, &reviewer, now)
                .await?
            {
                return Err(EngineError::ConcurrentUpdate {
                    entity: "Discount",
                    id: old.id.clone(),
                });
            }
            let mut after = old.clone();
            after.status = DiscountStatus::Disabled;
            audit
                .record_tx(
                    &mut tx,
                    &audit_entry("discount.supersede", "discount", &old.id, actor, snapshot(old), snapshot(&after), now),
                )
                .await?;
            info!(discount_id = %old.id, superseded_by = %candidate.id, "Discount superseded");
        }

        if !repo
            .update_status_tx(&mut tx, discount_id, DiscountStatus::Pending, DiscountStatus::Approved, &reviewer, now)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Discount",
                id: discount_id.to_string(),
            });
        }

        let approved = repo
            .get_tx(&mut tx, discount_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Discount", discount_id))?;
        audit
            .record_tx(
                &mut tx,
                &audit_entry("discount.approve", "discount", discount_id, actor, snapshot(&candidate), snapshot(&approved), now),
            )
            .await?;
        tx.commit().await?;

        info!(discount_id = %discount_id, product_id = %approved.product_id, "Discount approved");
        Ok(approved)
    }

    /// PENDING | APPROVED → DISABLED. Effective for the next pricing call.
    pub async fn disable(&self, actor: &Actor, discount_id: &str) -> EngineResult<Discount> {
        let repo = self.db.discounts();
        let now = Utc::now();

        let mut tx = self.db.begin_write().await?;
        let current = repo
            .get_tx(&mut tx, discount_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Discount", discount_id))?;
        current.ensure_can_disable()?;

        if !repo
            .update_status_tx(&mut tx, discount_id, current.status, DiscountStatus::Disabled, &actor.label(), now)
            .await?
        {
            return Err(EngineError::ConcurrentUpdate {
                entity: "Discount",
                id: discount_id.to_string(),
            });
        }

        let disabled = repo
            .get_tx(&mut tx, discount_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Discount", discount_id))?;
        self.db
            .audit()
            .record_tx(
                &mut tx,
                &audit_entry("discount.disable", "discount", discount_id, actor, snapshot(&current), snapshot(&disabled), now),
            )
            .await?;
        tx.commit().await?;

        info!(discount_id = %discount_id, "Discount disabled");
        Ok(disabled)
    }

    pub async fn list_pending(&self) -> EngineResult<Vec<Discount>> {
        Ok(self.db.discounts().list_by_status(DiscountStatus::Pending).await?)
    }

    pub async fn list_for_partner(&self, partner_id: &str) -> EngineResult<Vec<Discount>> {
        Ok(self.db.discounts().list_for_partner(partner_id).await?)
    }

    // =========================================================================
    // Limits
    // =========================================================================

    pub async fn limits(&self) -> EngineResult<Vec<DiscountLimit>> {
        Ok(self.db.discounts().list_limits().await?)
    }

    /// Sets the global (`category = None`) or a category limit.
    pub async fn set_limit(&self, actor: &Actor, limit: DiscountLimit) -> EngineResult<DiscountLimit> {
        if limit.min > limit.max || !limit.max.is_valid_percentage() {
            return Err(ValidationError::OutOfRange {
                field: "limit".to_string(),
                min: 0,
                max: 10_000,
            }
            .into());
        }

        let before = self
            .limits()
            .await?
            .into_iter()
            .find(|l| l.category == limit.category);
        let mut tx = self.db.begin_write().await?;
        self.db.discounts().upsert_limit_tx(&mut tx, &limit).await?;
        self.db
            .audit()
            .record_tx(
                &mut tx,
                &audit_entry(
                    "discount.set_limit",
                    "discount_limit",
                    limit.category.as_deref().unwrap_or("global"),
                    actor,
                    before.as_ref().and_then(snapshot),
                    snapshot(&limit),
                    Utc::now(),
                ),
            )
            .await?;
        tx.commit().await?;
        Ok(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{db, operator, seed_product};
    use chrono::Duration;
    use merchflow_core::discount::DiscountWindow;
    use merchflow_core::money::Rate;
    use merchflow_core::ErrorKind;

    fn resolver(db: &Database) -> DiscountResolver {
        DiscountResolver::new(
            db.clone(),
            Arc::new(crate::ports::DbCatalog::new(db.clone())),
            DiscountLimit {
                category: None,
                min: Rate::from_percent(1),
                max: Rate::from_percent(50),
            },
        )
    }

    fn proposal(product_id: &str, pct: u32) -> DiscountProposal {
        DiscountProposal {
            product_id: product_id.into(),
            rate: Rate::from_percent(pct),
            window: DiscountWindow::always(),
            terms_accepted: true,
        }
    }

    #[tokio::test]
    async fn test_propose_checks_ownership_and_limits() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);

        let err = resolver.propose("partner-2", proposal("p1", 10)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = resolver.propose("partner-1", proposal("p1", 60)).await.unwrap_err();
        assert_eq!(err.code(), "DISCOUNT_OUT_OF_BOUNDS");

        let mut unaccepted = proposal("p1", 10);
        unaccepted.terms_accepted = false;
        let err = resolver.propose("partner-1", unaccepted).await.unwrap_err();
        assert_eq!(err.code(), "TERMS_NOT_ACCEPTED");

        let discount = resolver.propose("partner-1", proposal("p1", 10)).await.unwrap();
        assert_eq!(discount.status, DiscountStatus::Pending);
        assert!(resolver.active_discount_for("p1", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_category_limit_overrides_builtin() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);
        resolver
            .set_limit(
                &operator(),
                DiscountLimit {
                    category: Some("apparel".into()),
                    min: Rate::from_percent(5),
                    max: Rate::from_percent(20),
                },
            )
            .await
            .unwrap();

        let err = resolver.propose("partner-1", proposal("p1", 25)).await.unwrap_err();
        assert_eq!(err.code(), "DISCOUNT_OUT_OF_BOUNDS");
        assert!(resolver.propose("partner-1", proposal("p1", 20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_approve_requires_supersede_for_overlap() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);

        let first = resolver.propose("partner-1", proposal("p1", 10)).await.unwrap();
        let second = resolver.propose("partner-1", proposal("p1", 15)).await.unwrap();
        resolver.approve(&operator(), &first.id, false).await.unwrap();

        let err = resolver.approve(&operator(), &second.id, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "DISCOUNT_ALREADY_ACTIVE");

        resolver.approve(&operator(), &second.id, true).await.unwrap();
        let active = resolver.active_discount_for("p1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let old = db.discounts().get(&first.id).await.unwrap().unwrap();
        assert_eq!(old.status, DiscountStatus::Disabled);
        let trail = db.audit().list_for_entity("discount", &first.id).await.unwrap();
        assert!(trail.iter().any(|e| e.action == "discount.supersede"));
    }

    #[tokio::test]
    async fn test_disjoint_windows_do_not_conflict() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);
        let now = Utc::now();

        let mut june = proposal("p1", 10);
        june.window = DiscountWindow::new(Some(now - Duration::days(10)), Some(now + Duration::days(1)));
        let mut july = proposal("p1", 20);
        july.window = DiscountWindow::new(Some(now + Duration::days(2)), Some(now + Duration::days(30)));

        let a = resolver.propose("partner-1", june).await.unwrap();
        let b = resolver.propose("partner-1", july).await.unwrap();
        resolver.approve(&operator(), &a.id, false).await.unwrap();
        resolver.approve(&operator(), &b.id, false).await.unwrap();

        let active = resolver.active_discount_for("p1", now).await.unwrap().unwrap();
        assert_eq!(active.id, a.id);
        let later = resolver.active_discount_for("p1", now + Duration::days(5)).await.unwrap().unwrap();
        assert_eq!(later.id, b.id);
    }

    #[tokio::test]
    async fn test_disable_takes_effect_and_is_final() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);

        let d = resolver.propose("partner-1", proposal("p1", 10)).await.unwrap();
        resolver.approve(&operator(), &d.id, false).await.unwrap();
        resolver.disable(&operator(), &d.id).await.unwrap();
        assert!(resolver.active_discount_for("p1", Utc::now()).await.unwrap().is_none());

        let err = resolver.disable(&operator(), &d.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DISCOUNT_TRANSITION");
        let err = resolver.approve(&operator(), &d.id, false).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DISCOUNT_TRANSITION");
    }

    #[tokio::test]
    async fn test_unaudited_writes_do_not_persist() {
        let db = db().await;
        seed_product(&db, "p1", "partner-1", None).await;
        let resolver = resolver(&db);
        sqlx::query("DROP TABLE audit_log").execute(db.pool()).await.unwrap();

        assert!(resolver.propose("partner-1", proposal("p1", 10)).await.is_err());
        assert!(resolver.list_for_partner("partner-1").await.unwrap().is_empty());

        let global = DiscountLimit {
            category: None,
            min: Rate::from_percent(2),
            max: Rate::from_percent(30),
        };
        assert!(resolver.set_limit(&operator(), global).await.is_err());
        assert!(resolver.limits().await.unwrap().is_empty());
    }
}
