//! SLA violation persistence port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{SlaViolation, WorkflowKey};

/// Filter for listing violations.
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub workflow: Option<WorkflowKey>,
    pub open_only: bool,
    pub limit: Option<usize>,
}

/// Store for SLA violations and warning markers.
#[async_trait]
pub trait SlaRepository: Send + Sync {
    /// The open violation for a phase or activity instance, if any.
    async fn find_open(&self, entity_id: Uuid) -> DomainResult<Option<SlaViolation>>;

    /// Insert a new open violation. At most one open violation may exist per
    /// entity; a second insert fails with `ConcurrentModification`.
    async fn create(&self, violation: &SlaViolation) -> DomainResult<()>;

    /// Compare-and-swap update on `violation.version`; the stored version is
    /// bumped by one.
    async fn update(&self, violation: &SlaViolation) -> DomainResult<()>;

    /// Resolve every open violation for the given entities. Returns the
    /// violations that were resolved.
    async fn resolve_open(
        &self,
        entity_ids: &[Uuid],
        resolved_at: DateTime<Utc>,
    ) -> DomainResult<Vec<SlaViolation>>;

    /// Violations matching a filter, most recently detected first.
    async fn list(&self, filter: ViolationFilter) -> DomainResult<Vec<SlaViolation>>;

    /// Record that a warning went out for an entity. Returns false if one
    /// was already recorded.
    async fn record_warning(&self, entity_id: Uuid, warned_at: DateTime<Utc>) -> DomainResult<bool>;
}
