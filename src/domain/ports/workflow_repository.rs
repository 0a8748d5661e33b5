//! Workflow instance store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, PhaseInstance, PhaseName, PhaseStatus,
    WorkflowKey,
};

/// Filter for listing activity instances.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub cycle_id: Option<i64>,
    pub report_id: Option<i64>,
    pub phase: Option<PhaseName>,
    pub status: Option<ActivityStatus>,
    /// Only rows with `can_start` or `can_complete` set.
    pub actionable_only: bool,
}

impl ActivityFilter {
    pub fn for_workflow(key: WorkflowKey) -> Self {
        Self {
            cycle_id: Some(key.cycle_id),
            report_id: Some(key.report_id),
            ..Self::default()
        }
    }
}

/// Rows changed by one engine operation.
///
/// Every row carries the version it was read at. The store writes each row
/// only if that version is still current and bumps it by one; any miss rolls
/// back the whole set with `ConcurrentModification`.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub phases: Vec<PhaseInstance>,
    pub activities: Vec<ActivityInstance>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty() && self.activities.is_empty()
    }
}

/// Repository interface for phase and activity instances.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Whether any phase instance exists for the pair.
    async fn workflow_exists(&self, key: WorkflowKey) -> DomainResult<bool>;

    /// Insert all phase and activity instances of a new workflow atomically.
    async fn create_workflow(
        &self,
        phases: &[PhaseInstance],
        activities: &[ActivityInstance],
    ) -> DomainResult<()>;

    /// Get one phase instance.
    async fn get_phase(&self, key: WorkflowKey, phase: PhaseName)
        -> DomainResult<Option<PhaseInstance>>;

    /// All phase instances of a workflow, in phase order.
    async fn list_phases(&self, key: WorkflowKey) -> DomainResult<Vec<PhaseInstance>>;

    /// Phase instances across all workflows with the given status.
    async fn list_phases_by_status(&self, status: PhaseStatus) -> DomainResult<Vec<PhaseInstance>>;

    /// Get one activity instance by natural key.
    async fn get_activity(&self, key: &ActivityKey) -> DomainResult<Option<ActivityInstance>>;

    /// All activity instances of one phase.
    async fn list_phase_activities(
        &self,
        key: WorkflowKey,
        phase: PhaseName,
    ) -> DomainResult<Vec<ActivityInstance>>;

    /// Activity instances matching a filter.
    async fn list_activities(&self, filter: ActivityFilter) -> DomainResult<Vec<ActivityInstance>>;

    /// Every registered (cycle, report) pair.
    async fn list_workflows(&self) -> DomainResult<Vec<WorkflowKey>>;

    /// Commit a change set in one transaction with per-row compare-and-swap.
    async fn apply_changes(&self, changes: &ChangeSet) -> DomainResult<()>;
}
