//! Activity state machine for cycle/report workflows.
//!
//! The `WorkflowEngine` validates and applies activity status changes, keeps
//! the cached `can_start`/`can_complete` flags in step with the dependency
//! graph, runs the trigger rules, and completes or reopens phases.
//!
//! Every mutating call follows the same path:
//!
//! 1. take the per-workflow lock;
//! 2. load the phase and its activities into a [`PhaseState`];
//! 3. apply the requested change, then triggers, then phase reconciliation;
//! 4. commit all touched rows in one compare-and-swap transaction;
//! 5. write audit entries, resolve SLA violations and emit signals.
//!
//! Nothing from step 5 can undo step 4.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, ActivityType, Actor, AuditAction,
    AuditEntityType, AuditLogEntry, OutboundSignal, PhaseInstance, PhaseName, PhaseStatus,
    PhaseTemplate, SkipCondition, WorkflowKey,
};
use crate::domain::ports::{ContextProvider, SignalSink, SlaRepository, WorkflowRepository};
use crate::services::audit_log::AuditLogWriter;
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::phase_state::{ActivityChange, PhaseState};
use crate::services::template_catalog::TemplateCatalog;
use crate::services::trigger_rules::{TriggerContext, TriggerRuleEngine};

/// What a transition request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The requested change was applied.
    Applied,
    /// The activity was already in (or past) the requested state.
    AlreadyInState(ActivityStatus),
    /// Nothing to do, e.g. a domain event that was already recorded.
    NoChange,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyInState(_) => "already_in_state",
            Self::NoChange => "no_change",
        }
    }
}

/// Result of one engine operation.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub workflow: WorkflowKey,
    pub phase: PhaseName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub outcome: TransitionOutcome,
    /// The requested change plus every automatic one it caused.
    pub changes: Vec<ActivityChange>,
    pub phase_status: PhaseStatus,
    pub phase_completed: bool,
    pub phase_reopened: bool,
    pub signals: Vec<OutboundSignal>,
}

/// An automatic action taken while registering a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoAction {
    pub phase: PhaseName,
    pub activity: String,
    pub status: ActivityStatus,
}

/// Result of `register_workflow`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub workflow: WorkflowKey,
    /// False when the pair was already registered.
    pub created: bool,
    pub catalog_version: String,
    pub phases: usize,
    pub activities: usize,
    pub auto_actions: Vec<AutoAction>,
}

/// Side effects collected from a phase state, applied after commit.
#[derive(Default)]
struct Aftermath {
    audit: Vec<AuditLogEntry>,
    settled: Vec<Uuid>,
    signals: Vec<OutboundSignal>,
}

impl Aftermath {
    fn absorb(&mut self, state: &mut PhaseState<'_>) {
        self.audit.append(&mut state.audit);
        self.settled.append(&mut state.settled_entities);
        self.signals.extend(state.signals.iter().cloned());
    }
}

type LockMap = Mutex<HashMap<WorkflowKey, Arc<tokio::sync::Mutex<()>>>>;

fn lock_map(locks: &LockMap) -> std::sync::MutexGuard<'_, HashMap<WorkflowKey, Arc<tokio::sync::Mutex<()>>>> {
    match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Held for the duration of one workflow operation.
struct WorkflowGuard<'a> {
    locks: &'a LockMap,
    workflow: WorkflowKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for WorkflowGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock_map(self.locks);
        if locks
            .get(&self.workflow)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.workflow);
        }
    }
}

/// The transition engine.
pub struct WorkflowEngine {
    catalog: Arc<TemplateCatalog>,
    workflows: Arc<dyn WorkflowRepository>,
    sla: Arc<dyn SlaRepository>,
    context: Arc<dyn ContextProvider>,
    signals: Arc<dyn SignalSink>,
    audit: AuditLogWriter,
    resolver: DependencyResolver,
    triggers: TriggerRuleEngine,
    locks: LockMap,
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        workflows: Arc<dyn WorkflowRepository>,
        sla: Arc<dyn SlaRepository>,
        context: Arc<dyn ContextProvider>,
        signals: Arc<dyn SignalSink>,
        audit: AuditLogWriter,
    ) -> Self {
        let resolver = DependencyResolver::new();
        Self {
            catalog,
            workflows,
            sla,
            context,
            signals,
            audit,
            triggers: TriggerRuleEngine::new(resolver.clone()),
            resolver,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Serialize operations on one workflow. The map entry is dropped again
    /// once nobody holds or waits on it.
    async fn lock_workflow(&self, workflow: WorkflowKey) -> WorkflowGuard<'_> {
        let lock = {
            let mut locks = lock_map(&self.locks);
            Arc::clone(locks.entry(workflow).or_default())
        };
        WorkflowGuard {
            locks: &self.locks,
            workflow,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        lock_map(&self.locks).len()
    }

    async fn trigger_context(
        &self,
        workflow: WorkflowKey,
        templates: &[&PhaseTemplate],
    ) -> DomainResult<TriggerContext> {
        let needs_data_source = templates.iter().any(|t| {
            t.activities
                .iter()
                .any(|a| matches!(a.skip_condition, Some(SkipCondition::HasActiveDataSource)))
        });
        if !needs_data_source {
            return Ok(TriggerContext::default());
        }
        let active = self.context.has_active_data_source(workflow).await?;
        Ok(TriggerContext::default().with_active_data_source(active))
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Create all phase and activity instances for a (cycle, report) pair.
    ///
    /// Registering an existing pair is a no-op.
    pub async fn register_workflow(
        &self,
        workflow: WorkflowKey,
        actor: &Actor,
    ) -> DomainResult<RegistrationReport> {
        let _guard = self.lock_workflow(workflow).await;

        if self.workflows.workflow_exists(workflow).await? {
            tracing::debug!(
                cycle_id = workflow.cycle_id,
                report_id = workflow.report_id,
                "workflow already registered"
            );
            return Ok(RegistrationReport {
                workflow,
                created: false,
                catalog_version: self.catalog.version().to_string(),
                phases: 0,
                activities: 0,
                auto_actions: Vec::new(),
            });
        }

        let catalog = Arc::clone(&self.catalog);
        let templates: Vec<&PhaseTemplate> = catalog.phases().collect();
        let ctx = self.trigger_context(workflow, &templates).await?;
        let now = Utc::now();

        let mut aftermath = Aftermath::default();
        let mut auto_actions = Vec::new();
        let mut phases: Vec<PhaseInstance> = Vec::with_capacity(templates.len());
        let mut activities: Vec<ActivityInstance> = Vec::new();

        for template in templates {
            let instances = template
                .activities
                .iter()
                .map(|a| ActivityInstance::new(workflow, template.name, a.name.clone()))
                .collect();
            let mut state = PhaseState::new(template, PhaseInstance::new(workflow, template.name), instances, now);
            self.triggers.run(&mut state, &ctx)?;
            state.reconcile_phase_status(actor);

            auto_actions.extend(state.changes.iter().map(|c| AutoAction {
                phase: template.name,
                activity: c.activity.clone(),
                status: c.to,
            }));
            aftermath.absorb(&mut state);
            let (phase, phase_activities) = state.into_instances();
            phases.push(phase);
            activities.extend(phase_activities);
        }

        self.workflows.create_workflow(&phases, &activities).await?;

        tracing::info!(
            cycle_id = workflow.cycle_id,
            report_id = workflow.report_id,
            phases = phases.len(),
            activities = activities.len(),
            auto_actions = auto_actions.len(),
            "workflow registered"
        );

        let registered = AuditLogEntry::new(
            AuditEntityType::Workflow,
            workflow_entity_id(workflow),
            AuditAction::WorkflowRegistered,
            actor.id.clone(),
        )
        .with_new_value(serde_json::json!({
            "catalog_version": self.catalog.version(),
            "phases": phases.len(),
            "activities": activities.len(),
        }))
        .at(now);
        aftermath.audit.insert(0, registered);
        aftermath.settled.clear();
        self.settle(aftermath, now).await;

        Ok(RegistrationReport {
            workflow,
            created: true,
            catalog_version: self.catalog.version().to_string(),
            phases: phases.len(),
            activities: activities.len(),
            auto_actions,
        })
    }

    // ========================================================================
    // Activity transitions
    // ========================================================================

    /// Start, resume or rework an activity.
    pub async fn start_activity(&self, key: &ActivityKey, actor: &Actor) -> DomainResult<TransitionReport> {
        let name = key.activity.as_str();
        self.mutate_phase(key.workflow(), key.phase, Some(name), actor, |state, _| {
            let (status, can_start) = {
                let instance = state.get(name)?;
                (instance.status, instance.can_start)
            };
            match status {
                ActivityStatus::InProgress | ActivityStatus::Completed | ActivityStatus::Skipped => {
                    Ok(TransitionOutcome::AlreadyInState(status))
                }
                _ if !can_start => {
                    Err(DomainError::not_eligible(key.to_string(), state.blocking_reasons(name)))
                }
                _ => {
                    state.transition(name, ActivityStatus::InProgress, actor, None, false)?;
                    Ok(TransitionOutcome::Applied)
                }
            }
        })
        .await
    }

    /// Complete an in-progress activity.
    pub async fn complete_activity(&self, key: &ActivityKey, actor: &Actor) -> DomainResult<TransitionReport> {
        let name = key.activity.as_str();
        self.mutate_phase(key.workflow(), key.phase, Some(name), actor, |state, _| {
            let status = state.get(name)?.status;
            match status {
                ActivityStatus::Completed | ActivityStatus::Skipped => {
                    Ok(TransitionOutcome::AlreadyInState(status))
                }
                ActivityStatus::InProgress => {
                    check_approval_role(state.template, key, actor)?;
                    state.transition(name, ActivityStatus::Completed, actor, None, false)?;
                    Ok(TransitionOutcome::Applied)
                }
                other => Err(DomainError::not_eligible(
                    key.to_string(),
                    vec![format!("activity is {other}, not IN_PROGRESS")],
                )),
            }
        })
        .await
    }

    /// Send a completed activity back for rework.
    ///
    /// Everything downstream that was completed on the strength of it loses
    /// its standing, and a completed phase reopens.
    pub async fn request_revision(
        &self,
        key: &ActivityKey,
        actor: &Actor,
        reason: &str,
    ) -> DomainResult<TransitionReport> {
        let reason = required_reason(reason, "revision")?;
        let name = key.activity.as_str();
        self.mutate_phase(key.workflow(), key.phase, Some(name), actor, move |state, _| {
            match state.get(name)?.status {
                ActivityStatus::RevisionRequested => {
                    Ok(TransitionOutcome::AlreadyInState(ActivityStatus::RevisionRequested))
                }
                ActivityStatus::Completed => {
                    state.transition(name, ActivityStatus::RevisionRequested, actor, Some(reason), false)?;
                    Ok(TransitionOutcome::Applied)
                }
                other => Err(DomainError::not_eligible(
                    key.to_string(),
                    vec![format!("only COMPLETED activities can be revised (currently {other})")],
                )),
            }
        })
        .await
    }

    /// Skip an optional activity, or one whose skip condition holds.
    pub async fn skip_activity(
        &self,
        key: &ActivityKey,
        actor: &Actor,
        reason: Option<&str>,
    ) -> DomainResult<TransitionReport> {
        let name = key.activity.as_str();
        let note = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string);
        let triggers = &self.triggers;
        self.mutate_phase(key.workflow(), key.phase, Some(name), actor, move |state, ctx| {
            let status = state.get(name)?.status;
            match status {
                ActivityStatus::Skipped => Ok(TransitionOutcome::AlreadyInState(status)),
                ActivityStatus::NotStarted => {
                    let phase_template = state.template;
                    let template = phase_template
                        .activity(name)
                        .ok_or_else(|| DomainError::TemplateNotFound(key.to_string()))?;
                    let condition_holds = template
                        .skip_condition
                        .as_ref()
                        .is_some_and(|c| triggers.condition_holds(c, template, state, ctx));
                    if !template.is_optional && !condition_holds {
                        return Err(DomainError::not_eligible(
                            key.to_string(),
                            vec!["activity is required and no skip condition holds".to_string()],
                        ));
                    }
                    state.transition(name, ActivityStatus::Skipped, actor, note, false)?;
                    Ok(TransitionOutcome::Applied)
                }
                other => Err(DomainError::not_eligible(
                    key.to_string(),
                    vec![format!("only NOT_STARTED activities can be skipped (currently {other})")],
                )),
            }
        })
        .await
    }

    /// Put an in-progress activity on hold. `start_activity` resumes it.
    pub async fn block_activity(
        &self,
        key: &ActivityKey,
        actor: &Actor,
        reason: &str,
    ) -> DomainResult<TransitionReport> {
        let reason = required_reason(reason, "block")?;
        let name = key.activity.as_str();
        self.mutate_phase(key.workflow(), key.phase, Some(name), actor, move |state, _| {
            match state.get(name)?.status {
                ActivityStatus::Blocked => Ok(TransitionOutcome::AlreadyInState(ActivityStatus::Blocked)),
                ActivityStatus::InProgress => {
                    state.transition(name, ActivityStatus::Blocked, actor, Some(reason), false)?;
                    Ok(TransitionOutcome::Applied)
                }
                other => Err(DomainError::not_eligible(
                    key.to_string(),
                    vec![format!("only IN_PROGRESS activities can be blocked (currently {other})")],
                )),
            }
        })
        .await
    }

    // ========================================================================
    // Phase-level operations
    // ========================================================================

    /// Record an external completion event for a phase and let the trigger
    /// rules auto-complete whatever waits on it.
    pub async fn record_domain_event(
        &self,
        workflow: WorkflowKey,
        phase: PhaseName,
        event: &str,
        actor: &Actor,
    ) -> DomainResult<TransitionReport> {
        let event = event.trim();
        if event.is_empty() {
            return Err(DomainError::ValidationFailed("event name must not be empty".to_string()));
        }
        self.mutate_phase(workflow, phase, None, actor, |state, _| {
            if state.record_event(event, actor) {
                Ok(TransitionOutcome::Applied)
            } else {
                Ok(TransitionOutcome::NoChange)
            }
        })
        .await
    }

    /// Set planned dates. The SLA monitor treats `planned_end` as the phase
    /// due date.
    pub async fn set_phase_schedule(
        &self,
        workflow: WorkflowKey,
        phase: PhaseName,
        planned_start: Option<DateTime<Utc>>,
        planned_end: Option<DateTime<Utc>>,
        actor: &Actor,
    ) -> DomainResult<TransitionReport> {
        if let (Some(start), Some(end)) = (planned_start, planned_end) {
            if end < start {
                return Err(DomainError::ValidationFailed(format!(
                    "planned end {end} is before planned start {start}"
                )));
            }
        }
        self.mutate_phase(workflow, phase, None, actor, |state, _| {
            if state.phase.planned_start == planned_start && state.phase.planned_end == planned_end {
                return Ok(TransitionOutcome::NoChange);
            }
            state.schedule(planned_start, planned_end, actor);
            Ok(TransitionOutcome::Applied)
        })
        .await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn mutate_phase<F>(
        &self,
        workflow: WorkflowKey,
        phase: PhaseName,
        activity: Option<&str>,
        actor: &Actor,
        op: F,
    ) -> DomainResult<TransitionReport>
    where
        F: FnOnce(&mut PhaseState<'_>, &TriggerContext) -> DomainResult<TransitionOutcome> + Send,
    {
        let _guard = self.lock_workflow(workflow).await;

        let catalog = Arc::clone(&self.catalog);
        let template = catalog.get_phase_template(phase)?;
        let instance = self
            .workflows
            .get_phase(workflow, phase)
            .await?
            .ok_or(DomainError::WorkflowNotFound {
                cycle_id: workflow.cycle_id,
                report_id: workflow.report_id,
            })?;
        let activities = self.workflows.list_phase_activities(workflow, phase).await?;
        let ctx = self.trigger_context(workflow, &[template]).await?;
        let now = Utc::now();

        let mut state = PhaseState::new(template, instance, activities, now);
        state.refresh_flags(&self.resolver);

        let outcome = op(&mut state, &ctx)?;
        self.triggers.run(&mut state, &ctx)?;
        state.reconcile_phase_status(actor);

        let changes = state.change_set();
        if !changes.is_empty() {
            self.workflows.apply_changes(&changes).await?;
        }

        tracing::info!(
            cycle_id = workflow.cycle_id,
            report_id = workflow.report_id,
            phase = %phase.as_str(),
            activity = activity.unwrap_or("-"),
            actor = %actor.id,
            outcome = outcome.as_str(),
            changes = state.changes.len(),
            "workflow operation applied"
        );

        let mut aftermath = Aftermath::default();
        aftermath.absorb(&mut state);
        self.settle(aftermath, now).await;

        Ok(TransitionReport {
            workflow,
            phase,
            activity: activity.map(str::to_string),
            outcome,
            changes: std::mem::take(&mut state.changes),
            phase_status: state.phase.status,
            phase_completed: state.phase_completed,
            phase_reopened: state.phase_reopened,
            signals: std::mem::take(&mut state.signals),
        })
    }

    /// Post-commit work: audit, SLA resolution, signals. Failures are logged.
    async fn settle(&self, aftermath: Aftermath, now: DateTime<Utc>) {
        self.audit.record_all(aftermath.audit).await;

        if !aftermath.settled.is_empty() {
            match self.sla.resolve_open(&aftermath.settled, now).await {
                Ok(resolved) => {
                    for violation in resolved {
                        tracing::info!(
                            violation_id = %violation.id,
                            cycle_id = violation.cycle_id,
                            report_id = violation.report_id,
                            phase = %violation.phase.as_str(),
                            "sla violation resolved"
                        );
                        self.audit
                            .record(
                                AuditLogEntry::new(
                                    AuditEntityType::SlaViolation,
                                    violation.id.to_string(),
                                    AuditAction::ViolationResolved,
                                    crate::domain::models::SYSTEM_ACTOR_ID,
                                )
                                .with_change(serde_json::json!("open"), serde_json::json!("resolved"))
                                .at(now),
                            )
                            .await;
                    }
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    entities = aftermath.settled.len(),
                    "failed to resolve sla violations; the next sweep will retry"
                ),
            }
        }

        for signal in aftermath.signals {
            let name = signal.name();
            if let Err(e) = self.signals.emit(signal).await {
                tracing::warn!(signal = name, error = %e, "failed to emit signal");
            }
        }
    }
}

/// Audit entity id of a whole workflow.
pub fn workflow_entity_id(workflow: WorkflowKey) -> String {
    format!("{}/{}", workflow.cycle_id, workflow.report_id)
}

fn required_reason(reason: &str, what: &str) -> DomainResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::ValidationFailed(format!("a {what} reason is required")));
    }
    Ok(reason.to_string())
}

/// Approvals may only be given by the role the template names.
fn check_approval_role(template: &PhaseTemplate, key: &ActivityKey, actor: &Actor) -> DomainResult<()> {
    let activity = template
        .activity(&key.activity)
        .ok_or_else(|| DomainError::TemplateNotFound(key.to_string()))?;
    if activity.activity_type != ActivityType::Approval || actor.is_system() {
        return Ok(());
    }
    if actor.role == Some(activity.required_role) {
        return Ok(());
    }
    let held = actor.role.map_or("no role", |r| r.as_str());
    Err(DomainError::not_eligible(
        key.to_string(),
        vec![format!(
            "approval requires role {} (actor '{}' has {held})",
            activity.required_role, actor.id
        )],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::signals::MemorySignalSink;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAuditRepository, SqliteContextProvider,
        SqliteSlaRepository, SqliteWorkflowRepository,
    };
    use crate::domain::models::Role;

    async fn engine() -> WorkflowEngine {
        let pool = create_migrated_test_pool().await.unwrap();
        let audit = Arc::new(SqliteAuditRepository::new(pool.clone()));
        WorkflowEngine::new(
            Arc::new(TemplateCatalog::builtin().unwrap()),
            Arc::new(SqliteWorkflowRepository::new(pool.clone())),
            Arc::new(SqliteSlaRepository::new(pool.clone())),
            Arc::new(SqliteContextProvider::new(pool)),
            Arc::new(MemorySignalSink::new()),
            AuditLogWriter::with_defaults(audit),
        )
    }

    #[tokio::test]
    async fn test_workflow_locks_released_after_each_call() {
        let engine = engine().await;
        let tester = Actor::with_role("tester-1", Role::Tester);

        for report_id in 1..=3 {
            let workflow = WorkflowKey::new(1, report_id);
            engine.register_workflow(workflow, &Actor::system()).await.unwrap();
            let start = ActivityKey::new(1, report_id, PhaseName::Scoping, "Start");
            engine.start_activity(&start, &tester).await.unwrap();
            assert_eq!(engine.tracked_locks(), 0);
        }

        let missing = ActivityKey::new(9, 9, PhaseName::Scoping, "Start");
        assert!(engine.start_activity(&missing, &tester).await.is_err());
        assert_eq!(engine.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_is_tracked_until_dropped() {
        let engine = engine().await;
        let workflow = WorkflowKey::new(2, 20);

        let guard = engine.lock_workflow(workflow).await;
        assert_eq!(engine.tracked_locks(), 1);
        drop(guard);
        assert_eq!(engine.tracked_locks(), 0);
    }
}
