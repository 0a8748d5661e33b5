//! SQLite implementation of the AuditRepository.
//!
//! The table rejects UPDATE and DELETE through triggers; rows are only ever
//! inserted.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::adapters::sqlite::{parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AuditAction, AuditEntityType, AuditFilter, AuditLogEntry};
use crate::domain::ports::AuditRepository;

#[derive(Clone)]
pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    entity_type: String,
    entity_id: String,
    action: String,
    old_value: Option<String>,
    new_value: Option<String>,
    performed_by: String,
    performed_at: String,
    note: Option<String>,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = DomainError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let entity_type = AuditEntityType::from_str(&row.entity_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid audit entity type: {}", row.entity_type))
        })?;
        let action = AuditAction::from_str(&row.action)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid audit action: {}", row.action)))?;

        Ok(AuditLogEntry {
            id: parse_uuid(&row.id)?,
            entity_type,
            entity_id: row.entity_id,
            action,
            old_value: row.old_value.map(|v| serde_json::from_str(&v)).transpose()?,
            new_value: row.new_value.map(|v| serde_json::from_str(&v)).transpose()?,
            performed_by: row.performed_by,
            performed_at: parse_datetime(&row.performed_at)?,
            note: row.note,
        })
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, entry: &AuditLogEntry) -> DomainResult<()> {
        let old_value = entry.old_value.as_ref().map(serde_json::to_string).transpose()?;
        let new_value = entry.new_value.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT OR IGNORE INTO audit_log
               (id, entity_type, entity_id, action, old_value, new_value, performed_by, performed_at, note)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.entity_type.as_str())
        .bind(&entry.entity_id)
        .bind(entry.action.as_str())
        .bind(&old_value)
        .bind(&new_value)
        .bind(&entry.performed_by)
        .bind(entry.performed_at.to_rfc3339())
        .bind(&entry.note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, entity_type, entity_id, action, old_value, new_value, performed_by, performed_at, note \
             FROM audit_log WHERE 1=1",
        );

        if let Some(entity_type) = filter.entity_type {
            query.push(" AND entity_type = ").push_bind(entity_type.as_str());
        }
        if let Some(entity_id) = filter.entity_id {
            query.push(" AND entity_id = ").push_bind(entity_id);
        }
        if let Some(action) = filter.action {
            query.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(performed_by) = filter.performed_by {
            query.push(" AND performed_by = ").push_bind(performed_by);
        }
        if let Some(from) = filter.from {
            query.push(" AND performed_at >= ").push_bind(from.to_rfc3339());
        }
        if let Some(to) = filter.to {
            query.push(" AND performed_at <= ").push_bind(to.to_rfc3339());
        }
        query.push(" ORDER BY performed_at, seq");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build_query_as::<AuditRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn repo() -> SqliteAuditRepository {
        SqliteAuditRepository::new(create_migrated_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_append_is_idempotent_on_id() {
        let repo = repo().await;
        let entry = AuditLogEntry::new(AuditEntityType::Activity, "a-1", AuditAction::ActivityCompleted, "t1")
            .with_change(serde_json::json!("in_progress"), serde_json::json!("completed"));

        repo.append(&entry).await.unwrap();
        repo.append(&entry).await.unwrap();

        let trail = repo.trail(AuditEntityType::Activity, "a-1").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].new_value, Some(serde_json::json!("completed")));
        assert_eq!(trail[0].performed_by, "t1");
    }

    #[tokio::test]
    async fn test_filters_and_order() {
        let repo = repo().await;
        let base = chrono::Utc::now();
        for (i, action) in [AuditAction::ActivityStarted, AuditAction::ActivityCompleted].into_iter().enumerate() {
            let entry = AuditLogEntry::new(AuditEntityType::Activity, "a-2", action, "t1")
                .at(base + chrono::Duration::seconds(i as i64));
            repo.append(&entry).await.unwrap();
        }
        repo.append(&AuditLogEntry::new(AuditEntityType::Phase, "p-1", AuditAction::PhaseStarted, "t2"))
            .await
            .unwrap();

        let trail = repo.trail(AuditEntityType::Activity, "a-2").await.unwrap();
        assert_eq!(
            trail.iter().map(|e| e.action).collect::<Vec<_>>(),
            vec![AuditAction::ActivityStarted, AuditAction::ActivityCompleted]
        );

        let by_actor = repo.list(AuditFilter::new().with_actor("t2")).await.unwrap();
        assert_eq!(by_actor.len(), 1);
        assert_eq!(repo.list(AuditFilter::new().with_limit(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rows_cannot_be_rewritten() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteAuditRepository::new(pool.clone());
        repo.append(&AuditLogEntry::new(AuditEntityType::Phase, "p-9", AuditAction::PhaseStarted, "t1"))
            .await
            .unwrap();

        assert!(sqlx::query("DELETE FROM audit_log").execute(&pool).await.is_err());
        assert!(sqlx::query("UPDATE audit_log SET performed_by = 'x'").execute(&pool).await.is_err());
    }
}
