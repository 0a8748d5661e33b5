//! SQLite-backed data source configurations, read by skip conditions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::adapters::sqlite::parse_datetime;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowKey;
use crate::domain::ports::ContextProvider;

/// A data source configured for a cycle/report pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSourceConfiguration {
    pub cycle_id: i64,
    pub report_id: i64,
    pub name: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct DataSourceRow {
    cycle_id: i64,
    report_id: i64,
    name: String,
    is_active: bool,
    updated_at: String,
}

impl TryFrom<DataSourceRow> for DataSourceConfiguration {
    type Error = DomainError;

    fn try_from(row: DataSourceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            cycle_id: row.cycle_id,
            report_id: row.report_id,
            name: row.name,
            is_active: row.is_active,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteContextProvider {
    pool: SqlitePool,
}

impl SqliteContextProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a named data source for the pair.
    pub async fn set_data_source(&self, workflow: WorkflowKey, name: &str, active: bool) -> DomainResult<()> {
        if name.trim().is_empty() {
            return Err(DomainError::ValidationFailed("data source name must not be empty".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO data_source_configurations (cycle_id, report_id, name, is_active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (cycle_id, report_id, name)
               DO UPDATE SET is_active = excluded.is_active, updated_at = excluded.updated_at"#,
        )
        .bind(workflow.cycle_id)
        .bind(workflow.report_id)
        .bind(name.trim())
        .bind(active)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_data_sources(&self, workflow: WorkflowKey) -> DomainResult<Vec<DataSourceConfiguration>> {
        let rows: Vec<DataSourceRow> = sqlx::query_as(
            "SELECT cycle_id, report_id, name, is_active, updated_at FROM data_source_configurations \
             WHERE cycle_id = ? AND report_id = ? ORDER BY name",
        )
        .bind(workflow.cycle_id)
        .bind(workflow.report_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DataSourceConfiguration::try_from).collect()
    }
}

#[async_trait]
impl ContextProvider for SqliteContextProvider {
    async fn has_active_data_source(&self, workflow: WorkflowKey) -> DomainResult<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM data_source_configurations WHERE cycle_id = ? AND report_id = ? AND is_active = 1",
        )
        .bind(workflow.cycle_id)
        .bind(workflow.report_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn test_active_data_source_toggles() {
        let provider = SqliteContextProvider::new(create_migrated_test_pool().await.unwrap());
        let key = WorkflowKey::new(21, 156);

        assert!(!provider.has_active_data_source(key).await.unwrap());

        provider.set_data_source(key, "core-banking", true).await.unwrap();
        assert!(provider.has_active_data_source(key).await.unwrap());
        assert!(!provider.has_active_data_source(WorkflowKey::new(21, 157)).await.unwrap());

        provider.set_data_source(key, "core-banking", false).await.unwrap();
        assert!(!provider.has_active_data_source(key).await.unwrap());

        let sources = provider.list_data_sources(key).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert!(!sources[0].is_active);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        let provider = SqliteContextProvider::new(create_migrated_test_pool().await.unwrap());
        let err = provider.set_data_source(WorkflowKey::new(1, 1), "  ", true).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }
}
