//! Audit log persistence port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditEntityType, AuditFilter, AuditLogEntry};

/// Append-only store for audit entries.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append one entry. Appending an entry whose id is already stored is a no-op.
    async fn append(&self, entry: &AuditLogEntry) -> DomainResult<()>;

    /// Entries matching a filter, oldest first.
    async fn list(&self, filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>>;

    /// Full history of one entity, oldest first.
    async fn trail(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
    ) -> DomainResult<Vec<AuditLogEntry>> {
        self.list(AuditFilter::for_entity(entity_type, entity_id)).await
    }
}
