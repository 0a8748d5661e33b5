//! Read-side queries over workflow instances.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, ActivityType, AuditEntityType, AuditFilter, AuditLogEntry, PhaseInstance,
    PhaseName, PhaseStatus, Role, SlaViolation, WorkflowKey,
};
use crate::domain::ports::{ActivityFilter, SlaRepository, ViolationFilter, WorkflowRepository};
use crate::services::audit_log::AuditLogWriter;
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::template_catalog::TemplateCatalog;

/// Activity counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub revision_requested: usize,
    pub completed: usize,
    pub skipped: usize,
}

impl Progress {
    pub fn of<'a>(activities: impl IntoIterator<Item = &'a ActivityInstance>) -> Self {
        activities.into_iter().fold(Self::default(), |mut p, a| {
            p.total += 1;
            match a.status {
                ActivityStatus::NotStarted => p.not_started += 1,
                ActivityStatus::InProgress => p.in_progress += 1,
                ActivityStatus::Blocked => p.blocked += 1,
                ActivityStatus::RevisionRequested => p.revision_requested += 1,
                ActivityStatus::Completed => p.completed += 1,
                ActivityStatus::Skipped => p.skipped += 1,
            }
            p
        })
    }

    /// Completed plus skipped.
    pub fn done(&self) -> usize {
        self.completed + self.skipped
    }
}

/// Something a user can do right now.
#[derive(Debug, Clone, Serialize)]
pub struct ActionableActivity {
    pub activity: ActivityInstance,
    pub activity_type: ActivityType,
    pub required_role: Role,
    /// "start" or "complete".
    pub action: &'static str,
}

/// An activity with its template facts and current blockers.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    #[serde(flatten)]
    pub instance: ActivityInstance,
    pub activity_type: ActivityType,
    pub required_role: Role,
    pub is_optional: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking_reasons: Vec<String>,
}

/// Full status of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStatusView {
    pub phase: PhaseInstance,
    pub activities: Vec<ActivityView>,
    pub progress: Progress,
    pub open_violations: Vec<SlaViolation>,
}

/// One row of a workflow overview.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: PhaseName,
    pub order: u32,
    pub status: PhaseStatus,
    pub progress: Progress,
    pub planned_end: Option<chrono::DateTime<chrono::Utc>>,
    pub actual_start: Option<chrono::DateTime<chrono::Utc>>,
    pub actual_end: Option<chrono::DateTime<chrono::Utc>>,
}

/// All nine phases of a workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOverview {
    pub workflow: WorkflowKey,
    pub phases: Vec<PhaseSummary>,
    pub open_violations: usize,
}

/// Query service over the workflow store, SLA store and audit log.
#[derive(Clone)]
pub struct WorkflowQueryService {
    catalog: Arc<TemplateCatalog>,
    workflows: Arc<dyn WorkflowRepository>,
    sla: Arc<dyn SlaRepository>,
    audit: AuditLogWriter,
    resolver: DependencyResolver,
}

impl WorkflowQueryService {
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        workflows: Arc<dyn WorkflowRepository>,
        sla: Arc<dyn SlaRepository>,
        audit: AuditLogWriter,
    ) -> Self {
        Self {
            catalog,
            workflows,
            sla,
            audit,
            resolver: DependencyResolver::new(),
        }
    }

    /// Activities the given role can start or complete now. Admins see every
    /// actionable activity.
    pub async fn list_actionable_activities(
        &self,
        role: Role,
        cycle_id: Option<i64>,
        report_id: Option<i64>,
    ) -> DomainResult<Vec<ActionableActivity>> {
        let candidates = self
            .workflows
            .list_activities(ActivityFilter {
                cycle_id,
                report_id,
                actionable_only: true,
                ..ActivityFilter::default()
            })
            .await?;

        let mut actionable = Vec::new();
        for activity in candidates.into_iter().filter(ActivityInstance::is_actionable) {
            let template = match self.catalog.get_activity_template(activity.phase, &activity.activity_name) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(activity = %activity.key(), error = %e, "activity has no template");
                    continue;
                }
            };
            if role != Role::Admin && template.required_role != role {
                continue;
            }
            let action = if activity.can_complete { "complete" } else { "start" };
            actionable.push(ActionableActivity {
                activity_type: template.activity_type,
                required_role: template.required_role,
                action,
                activity,
            });
        }
        actionable.sort_by(|a, b| {
            (a.activity.cycle_id, a.activity.report_id, a.activity.phase.order())
                .cmp(&(b.activity.cycle_id, b.activity.report_id, b.activity.phase.order()))
        });
        Ok(actionable)
    }

    /// One phase with its activities, progress and open violations.
    pub async fn get_phase_status(&self, workflow: WorkflowKey, phase: PhaseName) -> DomainResult<PhaseStatusView> {
        let instance = self
            .workflows
            .get_phase(workflow, phase)
            .await?
            .ok_or(DomainError::WorkflowNotFound {
                cycle_id: workflow.cycle_id,
                report_id: workflow.report_id,
            })?;
        let template = self.catalog.get_phase_template(phase)?;
        let activities = self.workflows.list_phase_activities(workflow, phase).await?;
        let eligibility = self
            .resolver
            .evaluate_phase(template, &DependencyResolver::status_map(&activities));

        let progress = Progress::of(&activities);
        let mut ordered: Vec<(u32, ActivityView)> = activities
            .into_iter()
            .filter_map(|instance| {
                let t = template.activity(&instance.activity_name)?;
                let blocking_reasons = if instance.status.is_startable() {
                    eligibility
                        .get(&instance.activity_name)
                        .map(|e| e.reasons.clone())
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                let view = ActivityView {
                    activity_type: t.activity_type,
                    required_role: t.required_role,
                    is_optional: t.is_optional,
                    blocking_reasons,
                    instance,
                };
                Some((t.order, view))
            })
            .collect();
        ordered.sort_by_key(|(order, _)| *order);
        let views: Vec<ActivityView> = ordered.into_iter().map(|(_, view)| view).collect();

        let ids: Vec<uuid::Uuid> = std::iter::once(instance.id)
            .chain(views.iter().map(|v| v.instance.id))
            .collect();
        let open_violations = self
            .sla
            .list(ViolationFilter {
                workflow: Some(workflow),
                open_only: true,
                limit: None,
            })
            .await?
            .into_iter()
            .filter(|v| ids.contains(&v.entity_id))
            .collect();

        Ok(PhaseStatusView {
            phase: instance,
            activities: views,
            progress,
            open_violations,
        })
    }

    /// History of an entity, oldest first.
    pub async fn get_audit_trail(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
    ) -> DomainResult<Vec<AuditLogEntry>> {
        self.audit.trail(entity_type, entity_id).await
    }

    /// Every phase of a workflow in order.
    pub async fn get_workflow_overview(&self, workflow: WorkflowKey) -> DomainResult<WorkflowOverview> {
        let phases = self.workflows.list_phases(workflow).await?;
        if phases.is_empty() {
            return Err(DomainError::WorkflowNotFound {
                cycle_id: workflow.cycle_id,
                report_id: workflow.report_id,
            });
        }
        let activities = self
            .workflows
            .list_activities(ActivityFilter::for_workflow(workflow))
            .await?;

        let mut summaries: Vec<PhaseSummary> = phases
            .iter()
            .map(|p| PhaseSummary {
                phase: p.phase,
                order: p.phase.order(),
                status: p.status,
                progress: Progress::of(activities.iter().filter(|a| a.phase == p.phase)),
                planned_end: p.planned_end,
                actual_start: p.actual_start,
                actual_end: p.actual_end,
            })
            .collect();
        summaries.sort_by_key(|s| s.order);

        let open_violations = self
            .sla
            .list(ViolationFilter {
                workflow: Some(workflow),
                open_only: true,
                limit: None,
            })
            .await?
            .len();

        Ok(WorkflowOverview {
            workflow,
            phases: summaries,
            open_violations,
        })
    }

    /// Audit entries matching a filter, oldest first.
    pub async fn audit_entries(&self, filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>> {
        self.audit.query(filter).await
    }

    pub async fn find_activity(&self, key: &ActivityKey) -> DomainResult<Option<ActivityInstance>> {
        self.workflows.get_activity(key).await
    }

    pub async fn list_workflows(&self) -> DomainResult<Vec<WorkflowKey>> {
        self.workflows.list_workflows().await
    }

    pub async fn list_violations(&self, filter: ViolationFilter) -> DomainResult<Vec<SlaViolation>> {
        self.sla.list(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counts() {
        let key = WorkflowKey::new(1, 2);
        let mut a = ActivityInstance::new(key, PhaseName::Scoping, "Start");
        a.status = ActivityStatus::Completed;
        let mut b = ActivityInstance::new(key, PhaseName::Scoping, "Define Scope");
        b.status = ActivityStatus::Skipped;
        let c = ActivityInstance::new(key, PhaseName::Scoping, "Tester Review");

        let progress = Progress::of([&a, &b, &c]);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.done(), 2);
        assert_eq!(progress.not_started, 1);
    }
}
