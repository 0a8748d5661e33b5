//! SQLite implementation of the WorkflowRepository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::adapters::sqlite::{parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, PhaseInstance, PhaseName, PhaseStatus,
    WorkflowKey,
};
use crate::domain::ports::{ActivityFilter, ChangeSet, WorkflowRepository};

const PHASE_COLUMNS: &str = "id, cycle_id, report_id, phase, phase_order, status, planned_start, planned_end, \
     actual_start, actual_end, started_by, completed_by, phase_data, created_at, updated_at, version";

const ACTIVITY_COLUMNS: &str = "id, cycle_id, report_id, phase, activity_name, status, can_start, can_complete, \
     started_at, started_by, completed_at, completed_by, revision_reason, blocked_reason, \
     created_at, updated_at, version";

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRow {
    id: String,
    cycle_id: i64,
    report_id: i64,
    phase: String,
    #[allow(dead_code)]
    phase_order: i64,
    status: String,
    planned_start: Option<String>,
    planned_end: Option<String>,
    actual_start: Option<String>,
    actual_end: Option<String>,
    started_by: Option<String>,
    completed_by: Option<String>,
    phase_data: String,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl TryFrom<PhaseRow> for PhaseInstance {
    type Error = DomainError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        let phase = PhaseName::from_str(&row.phase)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase)))?;
        let status = PhaseStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase status: {}", row.status)))?;

        Ok(PhaseInstance {
            id: parse_uuid(&row.id)?,
            cycle_id: row.cycle_id,
            report_id: row.report_id,
            phase,
            status,
            planned_start: parse_optional_datetime(row.planned_start)?,
            planned_end: parse_optional_datetime(row.planned_end)?,
            actual_start: parse_optional_datetime(row.actual_start)?,
            actual_end: parse_optional_datetime(row.actual_end)?,
            started_by: row.started_by,
            completed_by: row.completed_by,
            phase_data: serde_json::from_str(&row.phase_data)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: String,
    cycle_id: i64,
    report_id: i64,
    phase: String,
    activity_name: String,
    status: String,
    can_start: bool,
    can_complete: bool,
    started_at: Option<String>,
    started_by: Option<String>,
    completed_at: Option<String>,
    completed_by: Option<String>,
    revision_reason: Option<String>,
    blocked_reason: Option<String>,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl TryFrom<ActivityRow> for ActivityInstance {
    type Error = DomainError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let phase = PhaseName::from_str(&row.phase)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase)))?;
        let status = ActivityStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid activity status: {}", row.status)))?;

        Ok(ActivityInstance {
            id: parse_uuid(&row.id)?,
            cycle_id: row.cycle_id,
            report_id: row.report_id,
            phase,
            activity_name: row.activity_name,
            status,
            can_start: row.can_start,
            can_complete: row.can_complete,
            started_at: parse_optional_datetime(row.started_at)?,
            started_by: row.started_by,
            completed_at: parse_optional_datetime(row.completed_at)?,
            completed_by: row.completed_by,
            revision_reason: row.revision_reason,
            blocked_reason: row.blocked_reason,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            version: row.version,
        })
    }
}

fn into_phases(rows: Vec<PhaseRow>) -> DomainResult<Vec<PhaseInstance>> {
    rows.into_iter().map(PhaseInstance::try_from).collect()
}

fn into_activities(rows: Vec<ActivityRow>) -> DomainResult<Vec<ActivityInstance>> {
    let mut activities = rows
        .into_iter()
        .map(ActivityInstance::try_from)
        .collect::<DomainResult<Vec<_>>>()?;
    activities.sort_by(|a, b| {
        (a.cycle_id, a.report_id, a.phase.order())
            .cmp(&(b.cycle_id, b.report_id, b.phase.order()))
    });
    Ok(activities)
}

fn conflict(entity: &str, id: impl ToString) -> DomainError {
    DomainError::ConcurrentModification {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn workflow_exists(&self, key: WorkflowKey) -> DomainResult<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM phase_instances WHERE cycle_id = ? AND report_id = ?")
                .bind(key.cycle_id)
                .bind(key.report_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn create_workflow(
        &self,
        phases: &[PhaseInstance],
        activities: &[ActivityInstance],
    ) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for phase in phases {
            let phase_data = serde_json::to_string(&phase.phase_data)?;
            let result = sqlx::query(&format!(
                "INSERT INTO phase_instances ({PHASE_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(phase.id.to_string())
            .bind(phase.cycle_id)
            .bind(phase.report_id)
            .bind(phase.phase.as_str())
            .bind(i64::from(phase.phase.order()))
            .bind(phase.status.as_str())
            .bind(phase.planned_start.map(|t| t.to_rfc3339()))
            .bind(phase.planned_end.map(|t| t.to_rfc3339()))
            .bind(phase.actual_start.map(|t| t.to_rfc3339()))
            .bind(phase.actual_end.map(|t| t.to_rfc3339()))
            .bind(&phase.started_by)
            .bind(&phase.completed_by)
            .bind(&phase_data)
            .bind(phase.created_at.to_rfc3339())
            .bind(phase.updated_at.to_rfc3339())
            .bind(phase.version)
            .execute(&mut *tx)
            .await;

            if let Err(sqlx::Error::Database(db)) = &result {
                if db.is_unique_violation() {
                    return Err(conflict("workflow", phase.workflow()));
                }
            }
            result?;
        }

        for activity in activities {
            sqlx::query(&format!(
                "INSERT INTO activity_instances ({ACTIVITY_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(activity.id.to_string())
            .bind(activity.cycle_id)
            .bind(activity.report_id)
            .bind(activity.phase.as_str())
            .bind(&activity.activity_name)
            .bind(activity.status.as_str())
            .bind(activity.can_start)
            .bind(activity.can_complete)
            .bind(activity.started_at.map(|t| t.to_rfc3339()))
            .bind(&activity.started_by)
            .bind(activity.completed_at.map(|t| t.to_rfc3339()))
            .bind(&activity.completed_by)
            .bind(&activity.revision_reason)
            .bind(&activity.blocked_reason)
            .bind(activity.created_at.to_rfc3339())
            .bind(activity.updated_at.to_rfc3339())
            .bind(activity.version)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_phase(&self, key: WorkflowKey, phase: PhaseName) -> DomainResult<Option<PhaseInstance>> {
        let row: Option<PhaseRow> = sqlx::query_as(&format!(
            "SELECT {PHASE_COLUMNS} FROM phase_instances WHERE cycle_id = ? AND report_id = ? AND phase = ?"
        ))
        .bind(key.cycle_id)
        .bind(key.report_id)
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PhaseInstance::try_from).transpose()
    }

    async fn list_phases(&self, key: WorkflowKey) -> DomainResult<Vec<PhaseInstance>> {
        let rows: Vec<PhaseRow> = sqlx::query_as(&format!(
            "SELECT {PHASE_COLUMNS} FROM phase_instances WHERE cycle_id = ? AND report_id = ? \
             ORDER BY phase_order"
        ))
        .bind(key.cycle_id)
        .bind(key.report_id)
        .fetch_all(&self.pool)
        .await?;

        into_phases(rows)
    }

    async fn list_phases_by_status(&self, status: PhaseStatus) -> DomainResult<Vec<PhaseInstance>> {
        let rows: Vec<PhaseRow> = sqlx::query_as(&format!(
            "SELECT {PHASE_COLUMNS} FROM phase_instances WHERE status = ? \
             ORDER BY cycle_id, report_id, phase_order"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_phases(rows)
    }

    async fn get_activity(&self, key: &ActivityKey) -> DomainResult<Option<ActivityInstance>> {
        let row: Option<ActivityRow> = sqlx::query_as(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_instances \
             WHERE cycle_id = ? AND report_id = ? AND phase = ? AND activity_name = ?"
        ))
        .bind(key.cycle_id)
        .bind(key.report_id)
        .bind(key.phase.as_str())
        .bind(&key.activity)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ActivityInstance::try_from).transpose()
    }

    async fn list_phase_activities(
        &self,
        key: WorkflowKey,
        phase: PhaseName,
    ) -> DomainResult<Vec<ActivityInstance>> {
        self.list_activities(ActivityFilter {
            phase: Some(phase),
            ..ActivityFilter::for_workflow(key)
        })
        .await
    }

    async fn list_activities(&self, filter: ActivityFilter) -> DomainResult<Vec<ActivityInstance>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ACTIVITY_COLUMNS} FROM activity_instances WHERE 1=1"));

        if let Some(cycle_id) = filter.cycle_id {
            query.push(" AND cycle_id = ").push_bind(cycle_id);
        }
        if let Some(report_id) = filter.report_id {
            query.push(" AND report_id = ").push_bind(report_id);
        }
        if let Some(phase) = filter.phase {
            query.push(" AND phase = ").push_bind(phase.as_str());
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if filter.actionable_only {
            query.push(" AND (can_start = 1 OR can_complete = 1)");
        }
        query.push(" ORDER BY cycle_id, report_id, created_at, activity_name");

        let rows = query.build_query_as::<ActivityRow>().fetch_all(&self.pool).await?;
        into_activities(rows)
    }

    async fn list_workflows(&self) -> DomainResult<Vec<WorkflowKey>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT DISTINCT cycle_id, report_id FROM phase_instances ORDER BY cycle_id, report_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(cycle_id, report_id)| WorkflowKey::new(cycle_id, report_id))
            .collect())
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> DomainResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // Dropping the transaction without commit rolls back every row.
        let mut tx = self.pool.begin().await?;

        for phase in &changes.phases {
            let phase_data = serde_json::to_string(&phase.phase_data)?;
            let result = sqlx::query(
                r#"UPDATE phase_instances SET status = ?, planned_start = ?, planned_end = ?,
                   actual_start = ?, actual_end = ?, started_by = ?, completed_by = ?,
                   phase_data = ?, updated_at = ?, version = version + 1
                   WHERE id = ? AND version = ?"#,
            )
            .bind(phase.status.as_str())
            .bind(phase.planned_start.map(|t| t.to_rfc3339()))
            .bind(phase.planned_end.map(|t| t.to_rfc3339()))
            .bind(phase.actual_start.map(|t| t.to_rfc3339()))
            .bind(phase.actual_end.map(|t| t.to_rfc3339()))
            .bind(&phase.started_by)
            .bind(&phase.completed_by)
            .bind(&phase_data)
            .bind(phase.updated_at.to_rfc3339())
            .bind(phase.id.to_string())
            .bind(phase.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(conflict("phase_instance", phase.id));
            }
        }

        for activity in &changes.activities {
            let result = sqlx::query(
                r#"UPDATE activity_instances SET status = ?, can_start = ?, can_complete = ?,
                   started_at = ?, started_by = ?, completed_at = ?, completed_by = ?,
                   revision_reason = ?, blocked_reason = ?, updated_at = ?, version = version + 1
                   WHERE id = ? AND version = ?"#,
            )
            .bind(activity.status.as_str())
            .bind(activity.can_start)
            .bind(activity.can_complete)
            .bind(activity.started_at.map(|t| t.to_rfc3339()))
            .bind(&activity.started_by)
            .bind(activity.completed_at.map(|t| t.to_rfc3339()))
            .bind(&activity.completed_by)
            .bind(&activity.revision_reason)
            .bind(&activity.blocked_reason)
            .bind(activity.updated_at.to_rfc3339())
            .bind(activity.id.to_string())
            .bind(activity.version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(conflict("activity_instance", activity.id));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup() -> (SqliteWorkflowRepository, WorkflowKey) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteWorkflowRepository::new(pool);
        let key = WorkflowKey::new(21, 156);
        let phase = PhaseInstance::new(key, PhaseName::Scoping);
        let activities = vec![
            ActivityInstance::new(key, PhaseName::Scoping, "Start"),
            ActivityInstance::new(key, PhaseName::Scoping, "Define Scope"),
        ];
        repo.create_workflow(&[phase], &activities).await.unwrap();
        (repo, key)
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let (repo, key) = setup().await;
        assert!(repo.workflow_exists(key).await.unwrap());
        assert!(!repo.workflow_exists(WorkflowKey::new(1, 1)).await.unwrap());

        let phase = repo.get_phase(key, PhaseName::Scoping).await.unwrap().unwrap();
        assert_eq!(phase.status, PhaseStatus::NotStarted);
        assert_eq!(repo.list_phase_activities(key, PhaseName::Scoping).await.unwrap().len(), 2);
        assert_eq!(repo.list_workflows().await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (repo, key) = setup().await;
        let err = repo
            .create_workflow(&[PhaseInstance::new(key, PhaseName::Scoping)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ConcurrentModification { .. }));
    }

    #[tokio::test]
    async fn test_apply_changes_bumps_version() {
        let (repo, key) = setup().await;
        let mut start = repo
            .get_activity(&ActivityKey::new(21, 156, PhaseName::Scoping, "Start"))
            .await
            .unwrap()
            .unwrap();
        start.can_start = true;

        repo.apply_changes(&ChangeSet {
            phases: vec![],
            activities: vec![start.clone()],
        })
        .await
        .unwrap();

        let stored = repo.get_activity(&start.key()).await.unwrap().unwrap();
        assert!(stored.can_start);
        assert_eq!(stored.version, start.version + 1);

        let actionable = repo
            .list_activities(ActivityFilter {
                actionable_only: true,
                ..ActivityFilter::for_workflow(key)
            })
            .await
            .unwrap();
        assert_eq!(actionable.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_rolls_back_whole_set() {
        let (repo, key) = setup().await;
        let activities = repo.list_phase_activities(key, PhaseName::Scoping).await.unwrap();
        let mut fresh = activities[0].clone();
        let mut stale = activities[1].clone();
        fresh.can_start = true;
        stale.can_start = true;
        stale.version += 5;

        let err = repo
            .apply_changes(&ChangeSet {
                phases: vec![],
                activities: vec![fresh.clone(), stale],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ConcurrentModification { .. }));

        let reread = repo.get_activity(&fresh.key()).await.unwrap().unwrap();
        assert!(!reread.can_start);
        assert_eq!(reread.version, 0);
    }
}
