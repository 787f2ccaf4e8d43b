//! # Discount Rules
//!
//! Partner-proposed, operator-approved percentage discounts per product.
//!
//! ## Lifecycle
//! ```text
//!   partner proposes           operator approves
//!  ──────────────────► PENDING ──────────────────► APPROVED
//!                         │                           │
//!                         │ operator disables         │ operator disables
//!                         ▼                           ▼
//!                      DISABLED ◄─────────────────────┘
//! ```
//!
//! A discount is *active* at `t` when it is APPROVED and its optional
//! `[starts_at, ends_at]` window contains `t`. At most one discount per
//! product may be active at any instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Rate;

// =============================================================================
// Status & Window
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountStatus {
    Pending,
    Approved,
    Disabled,
}

impl fmt::Display for DiscountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountStatus::Pending => write!(f, "PENDING"),
            DiscountStatus::Approved => write!(f, "APPROVED"),
            DiscountStatus::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Optional validity window. Missing ends are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiscountWindow {
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl DiscountWindow {
    pub fn new(starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Self {
        DiscountWindow { starts_at, ends_at }
    }

    /// Unbounded on both ends.
    pub fn always() -> Self {
        DiscountWindow::default()
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |s| t >= s) && self.ends_at.map_or(true, |e| t <= e)
    }

    /// True when some instant lies in both windows.
    pub fn overlaps(&self, other: &DiscountWindow) -> bool {
        let starts_before_other_ends = match (self.starts_at, other.ends_at) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        };
        let other_starts_before_self_ends = match (other.starts_at, self.ends_at) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        };
        starts_before_other_ends && other_starts_before_self_ends
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(s), Some(e)) = (self.starts_at, self.ends_at) {
            if e < s {
                return Err(ValidationError::InvalidFormat {
                    field: "window".to_string(),
                    reason: "end date is before start date".to_string(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Discount
// =============================================================================

/// A product×partner scoped discount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: String,
    pub product_id: String,
    pub partner_id: String,
    pub rate: Rate,
    pub window: DiscountWindow,
    pub status: DiscountStatus,
    pub terms_accepted: bool,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Discount {
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.status == DiscountStatus::Approved && self.window.contains(t)
    }

    /// PENDING → APPROVED.
    pub fn ensure_can_approve(&self) -> CoreResult<()> {
        match self.status {
            DiscountStatus::Pending => Ok(()),
            other => Err(CoreError::InvalidDiscountTransition {
                discount_id: self.id.clone(),
                current: other.to_string(),
                action: "approve".to_string(),
            }),
        }
    }

    /// PENDING | APPROVED → DISABLED.
    pub fn ensure_can_disable(&self) -> CoreResult<()> {
        match self.status {
            DiscountStatus::Pending | DiscountStatus::Approved => Ok(()),
            DiscountStatus::Disabled => Err(CoreError::InvalidDiscountTransition {
                discount_id: self.id.clone(),
                current: DiscountStatus::Disabled.to_string(),
                action: "disable".to_string(),
            }),
        }
    }
}

/// Picks the active discount at `now`.
///
/// Several active rows would be a modeling anomaly; the most recently
/// created one wins.
pub fn select_active<'a>(discounts: &'a [Discount], now: DateTime<Utc>) -> Option<&'a Discount> {
    discounts
        .iter()
        .filter(|d| d.is_active_at(now))
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Approved discounts whose window overlaps `candidate`'s window.
pub fn conflicting_approvals<'a>(
    candidate: &Discount,
    same_product: &'a [Discount],
) -> Vec<&'a Discount> {
    same_product
        .iter()
        .filter(|d| d.id != candidate.id)
        .filter(|d| d.status == DiscountStatus::Approved)
        .filter(|d| d.window.overlaps(&candidate.window))
        .collect()
}

// =============================================================================
// Limits
// =============================================================================

/// Min/max discount bounds, global or per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountLimit {
    /// `None` is the global limit.
    pub category: Option<String>,
    pub min: Rate,
    pub max: Rate,
}

/// Resolves the limit for `category`.
///
/// Category row first, then the global row, then `builtin`.
pub fn resolve_limit(
    limits: &[DiscountLimit],
    category: &str,
    builtin: &DiscountLimit,
) -> DiscountLimit {
    limits
        .iter()
        .find(|l| l.category.as_deref() == Some(category))
        .or_else(|| limits.iter().find(|l| l.category.is_none()))
        .unwrap_or(builtin)
        .clone()
}

/// A partner's proposal before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountProposal {
    pub product_id: String,
    pub rate: Rate,
    #[serde(default)]
    pub window: DiscountWindow,
    pub terms_accepted: bool,
}

/// Checks a proposal against the resolved limit.
pub fn validate_proposal(proposal: &DiscountProposal, limit: &DiscountLimit) -> CoreResult<()> {
    if !proposal.terms_accepted {
        return Err(CoreError::TermsNotAccepted);
    }
    proposal.window.validate()?;
    if proposal.rate < limit.min || proposal.rate > limit.max {
        return Err(CoreError::DiscountOutOfBounds {
            requested: proposal.rate,
            min: limit.min,
            max: limit.max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn discount(id: &str, status: DiscountStatus, created_offset_mins: i64) -> Discount {
        let now = Utc::now();
        Discount {
            id: id.into(),
            product_id: "p1".into(),
            partner_id: "partner-1".into(),
            rate: Rate::from_percent(10),
            window: DiscountWindow::always(),
            status,
            terms_accepted: true,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now + Duration::minutes(created_offset_mins),
            updated_at: now,
        }
    }

    #[test]
    fn test_window_contains_and_overlaps() {
        let now = Utc::now();
        let w = DiscountWindow::new(Some(now - Duration::days(1)), Some(now + Duration::days(1)));
        assert!(w.contains(now));
        assert!(!w.contains(now + Duration::days(2)));

        let later = DiscountWindow::new(Some(now + Duration::days(2)), None);
        assert!(!w.overlaps(&later));
        assert!(DiscountWindow::always().overlaps(&later));
    }

    #[test]
    fn test_select_active_prefers_newest() {
        let now = Utc::now() + Duration::hours(1);
        let rows = vec![
            discount("old", DiscountStatus::Approved, -10),
            discount("new", DiscountStatus::Approved, -1),
            discount("pending", DiscountStatus::Pending, 0),
        ];
        assert_eq!(select_active(&rows, now).map(|d| d.id.as_str()), Some("new"));
    }

    #[test]
    fn test_disabled_is_never_active() {
        let rows = vec![discount("d", DiscountStatus::Disabled, -1)];
        assert!(select_active(&rows, Utc::now()).is_none());
    }

    #[test]
    fn test_conflicting_approvals() {
        let candidate = discount("c", DiscountStatus::Pending, 0);
        let rows = vec![
            discount("a", DiscountStatus::Approved, -5),
            discount("p", DiscountStatus::Pending, -5),
        ];
        let conflicts = conflicting_approvals(&candidate, &rows);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, "a");
    }

    #[test]
    fn test_transitions() {
        assert!(discount("d", DiscountStatus::Pending, 0).ensure_can_approve().is_ok());
        assert!(discount("d", DiscountStatus::Approved, 0).ensure_can_approve().is_err());
        assert!(discount("d", DiscountStatus::Approved, 0).ensure_can_disable().is_ok());
        assert!(discount("d", DiscountStatus::Disabled, 0).ensure_can_disable().is_err());
    }

    #[test]
    fn test_limit_resolution_falls_back() {
        let builtin = DiscountLimit {
            category: None,
            min: Rate::from_percent(1),
            max: Rate::from_percent(50),
        };
        let limits = vec![
            DiscountLimit {
                category: Some("apparel".into()),
                min: Rate::from_percent(5),
                max: Rate::from_percent(30),
            },
            DiscountLimit {
                category: None,
                min: Rate::from_percent(2),
                max: Rate::from_percent(40),
            },
        ];
        assert_eq!(resolve_limit(&limits, "apparel", &builtin).max, Rate::from_percent(30));
        assert_eq!(resolve_limit(&limits, "drinkware", &builtin).max, Rate::from_percent(40));
        assert_eq!(resolve_limit(&[], "drinkware", &builtin).max, Rate::from_percent(50));
    }

    #[test]
    fn test_validate_proposal() {
        let limit = DiscountLimit {
            category: None,
            min: Rate::from_percent(1),
            max: Rate::from_percent(50),
        };
        let mut proposal = DiscountProposal {
            product_id: "p1".into(),
            rate: Rate::from_percent(10),
            window: DiscountWindow::always(),
            terms_accepted: true,
        };
        assert!(validate_proposal(&proposal, &limit).is_ok());

        proposal.rate = Rate::from_percent(60);
        assert!(matches!(
            validate_proposal(&proposal, &limit),
            Err(CoreError::DiscountOutOfBounds { .. })
        ));

        proposal.rate = Rate::from_percent(10);
        proposal.terms_accepted = false;
        assert!(matches!(
            validate_proposal(&proposal, &limit),
            Err(CoreError::TermsNotAccepted)
        ));
    }
}
