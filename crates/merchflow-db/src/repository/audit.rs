//! # Audit Repository
//!
//! Append-only trail of operator and partner actions with before/after
//! JSON snapshots. Entries are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// e.g. `discount.approve`, `commission.set_default`
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    /// `Actor::label()` of whoever acted.
    pub actor: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRecord {
    id: String,
    action: String,
    entity_type: String,
    entity_id: String,
    actor: String,
    before_json: Option<String>,
    after_json: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRecord> for AuditEntry {
    fn from(r: AuditRecord) -> Self {
        // Snapshots were written by `record`; unreadable JSON is dropped.
        let parse = |s: Option<String>| s.and_then(|s| serde_json::from_str(&s).ok());
        AuditEntry {
            id: r.id,
            action: r.action,
            entity_type: r.entity_type,
            entity_id: r.entity_id,
            actor: r.actor,
            before: parse(r.before_json),
            after: parse(r.after_json),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    pub async fn record(&self, entry: &AuditEntry) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        self.record_tx(&mut conn, entry).await
    }

    /// Writes the entry inside the caller's transaction.
    pub async fn record_tx(&self, conn: &mut SqliteConnection, entry: &AuditEntry) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, action, entity_type, entity_id, actor, before_json, after_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.actor)
        .bind(entry.before.as_ref().map(|v| v.to_string()))
        .bind(entry.after.as_ref().map(|v| v.to_string()))
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Entries for one entity, oldest first.
    pub async fn list_for_entity(&self, entity_type: &str, entity_id: &str) -> DbResult<Vec<AuditEntry>> {
        let records: Vec<AuditRecord> = sqlx::query_as(
            r#"
            SELECT id, action, entity_type, entity_id, actor, before_json, after_json, created_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at, id
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(AuditEntry::from).collect())
    }
}
