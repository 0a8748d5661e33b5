//! SQLite implementation of the SlaRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::adapters::sqlite::{parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PhaseName, SlaTargetKind, SlaViolation, ViolationStatus};
use crate::domain::ports::{SlaRepository, ViolationFilter};

const VIOLATION_COLUMNS: &str = "id, target_kind, entity_id, cycle_id, report_id, phase, activity_name, \
     due_at, detected_at, escalation_level, escalation_count, last_escalated_at, status, resolved_at, version";

#[derive(Clone)]
pub struct SqliteSlaRepository {
    pool: SqlitePool,
}

impl SqliteSlaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: String,
    target_kind: String,
    entity_id: String,
    cycle_id: i64,
    report_id: i64,
    phase: String,
    activity_name: Option<String>,
    due_at: String,
    detected_at: String,
    escalation_level: i64,
    escalation_count: i64,
    last_escalated_at: Option<String>,
    status: String,
    resolved_at: Option<String>,
    version: i64,
}

impl TryFrom<ViolationRow> for SlaViolation {
    type Error = DomainError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        let target_kind = SlaTargetKind::from_str(&row.target_kind)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid target kind: {}", row.target_kind)))?;
        let phase = PhaseName::from_str(&row.phase)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase)))?;
        let status = ViolationStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid violation status: {}", row.status)))?;

        Ok(SlaViolation {
            id: parse_uuid(&row.id)?,
            target_kind,
            entity_id: parse_uuid(&row.entity_id)?,
            cycle_id: row.cycle_id,
            report_id: row.report_id,
            phase,
            activity_name: row.activity_name,
            due_at: parse_datetime(&row.due_at)?,
            detected_at: parse_datetime(&row.detected_at)?,
            escalation_level: row.escalation_level as u32,
            escalation_count: row.escalation_count as u32,
            last_escalated_at: parse_optional_datetime(row.last_escalated_at)?,
            status,
            resolved_at: parse_optional_datetime(row.resolved_at)?,
            version: row.version,
        })
    }
}

#[async_trait]
impl SlaRepository for SqliteSlaRepository {
    async fn find_open(&self, entity_id: Uuid) -> DomainResult<Option<SlaViolation>> {
        let row: Option<ViolationRow> = sqlx::query_as(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM sla_violations WHERE entity_id = ? AND status = 'open'"
        ))
        .bind(entity_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SlaViolation::try_from).transpose()
    }

    async fn create(&self, violation: &SlaViolation) -> DomainResult<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO sla_violations ({VIOLATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(violation.id.to_string())
        .bind(violation.target_kind.as_str())
        .bind(violation.entity_id.to_string())
        .bind(violation.cycle_id)
        .bind(violation.report_id)
        .bind(violation.phase.as_str())
        .bind(&violation.activity_name)
        .bind(violation.due_at.to_rfc3339())
        .bind(violation.detected_at.to_rfc3339())
        .bind(i64::from(violation.escalation_level))
        .bind(i64::from(violation.escalation_count))
        .bind(violation.last_escalated_at.map(|t| t.to_rfc3339()))
        .bind(violation.status.as_str())
        .bind(violation.resolved_at.map(|t| t.to_rfc3339()))
        .bind(violation.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(DomainError::ConcurrentModification {
                entity: "sla_violation".to_string(),
                id: violation.entity_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, violation: &SlaViolation) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE sla_violations SET escalation_level = ?, escalation_count = ?,
               last_escalated_at = ?, status = ?, resolved_at = ?, version = version + 1
               WHERE id = ? AND version = ?"#,
        )
        .bind(i64::from(violation.escalation_level))
        .bind(i64::from(violation.escalation_count))
        .bind(violation.last_escalated_at.map(|t| t.to_rfc3339()))
        .bind(violation.status.as_str())
        .bind(violation.resolved_at.map(|t| t.to_rfc3339()))
        .bind(violation.id.to_string())
        .bind(violation.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrentModification {
                entity: "sla_violation".to_string(),
                id: violation.id.to_string(),
            });
        }
        Ok(())
    }

    async fn resolve_open(&self, entity_ids: &[Uuid], resolved_at: DateTime<Utc>) -> DomainResult<Vec<SlaViolation>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut resolved = Vec::new();

        for entity_id in entity_ids {
            let row: Option<ViolationRow> = sqlx::query_as(&format!(
                "SELECT {VIOLATION_COLUMNS} FROM sla_violations WHERE entity_id = ? AND status = 'open'"
            ))
            .bind(entity_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else { continue };
            let mut violation = SlaViolation::try_from(row)?;

            sqlx::query(
                "UPDATE sla_violations SET status = 'resolved', resolved_at = ?, version = version + 1 \
                 WHERE id = ? AND version = ?",
            )
            .bind(resolved_at.to_rfc3339())
            .bind(violation.id.to_string())
            .bind(violation.version)
            .execute(&mut *tx)
            .await?;

            violation.resolve(resolved_at);
            violation.version += 1;
            resolved.push(violation);
        }

        tx.commit().await?;
        Ok(resolved)
    }

    async fn list(&self, filter: ViolationFilter) -> DomainResult<Vec<SlaViolation>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {VIOLATION_COLUMNS} FROM sla_violations WHERE 1=1"));

        if let Some(workflow) = filter.workflow {
            query.push(" AND cycle_id = ").push_bind(workflow.cycle_id);
            query.push(" AND report_id = ").push_bind(workflow.report_id);
        }
        if filter.open_only {
            query.push(" AND status = 'open'");
        }
        query.push(" ORDER BY detected_at DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build_query_as::<ViolationRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(SlaViolation::try_from).collect()
    }

    async fn record_warning(&self, entity_id: Uuid, warned_at: DateTime<Utc>) -> DomainResult<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO sla_warnings (entity_id, warned_at) VALUES (?, ?)")
            .bind(entity_id.to_string())
            .bind(warned_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
