//! In-memory working copy of one phase during an engine operation.
//!
//! All status changes, derived flag updates, audit entries and signals of a
//! single operation are accumulated here and then committed together.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, Actor, AuditAction, AuditEntityType,
    AuditLogEntry, OutboundSignal, PhaseInstance, PhaseStatus, PhaseTemplate,
};
use crate::domain::ports::ChangeSet;
use crate::services::dependency_resolver::{DependencyResolver, Eligibility, StatusMap};

/// One status change applied during an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityChange {
    pub activity: String,
    pub from: ActivityStatus,
    pub to: ActivityStatus,
    pub performed_by: String,
    /// Applied by the trigger rule engine rather than requested.
    pub automatic: bool,
}

/// Working copy of a phase and its activities.
pub struct PhaseState<'t> {
    pub template: &'t PhaseTemplate,
    pub phase: PhaseInstance,
    activities: BTreeMap<String, ActivityInstance>,
    eligibility: HashMap<String, Eligibility>,
    dirty: BTreeSet<String>,
    phase_dirty: bool,
    pub audit: Vec<AuditLogEntry>,
    pub changes: Vec<ActivityChange>,
    pub signals: Vec<OutboundSignal>,
    /// Entities that stopped being pending; their open violations resolve.
    pub settled_entities: Vec<Uuid>,
    pub phase_completed: bool,
    pub phase_reopened: bool,
    now: DateTime<Utc>,
}

impl<'t> PhaseState<'t> {
    pub fn new(
        template: &'t PhaseTemplate,
        phase: PhaseInstance,
        activities: Vec<ActivityInstance>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            template,
            phase,
            activities: activities
                .into_iter()
                .map(|a| (a.activity_name.clone(), a))
                .collect(),
            eligibility: HashMap::new(),
            dirty: BTreeSet::new(),
            phase_dirty: false,
            audit: Vec::new(),
            changes: Vec::new(),
            signals: Vec::new(),
            settled_entities: Vec::new(),
            phase_completed: false,
            phase_reopened: false,
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn key(&self, activity: &str) -> ActivityKey {
        ActivityKey::new(self.phase.cycle_id, self.phase.report_id, self.phase.phase, activity)
    }

    pub fn find(&self, activity: &str) -> Option<&ActivityInstance> {
        self.activities.get(activity)
    }

    pub fn get(&self, activity: &str) -> DomainResult<&ActivityInstance> {
        self.activities
            .get(activity)
            .ok_or_else(|| DomainError::ActivityNotFound(self.key(activity).to_string()))
    }

    pub fn activities(&self) -> impl Iterator<Item = &ActivityInstance> {
        self.activities.values()
    }

    pub fn statuses(&self) -> StatusMap {
        self.activities
            .iter()
            .map(|(name, a)| (name.clone(), a.status))
            .collect()
    }

    /// Reasons `activity` cannot start, from the last flag refresh.
    pub fn blocking_reasons(&self, activity: &str) -> Vec<String> {
        self.eligibility
            .get(activity)
            .map(|e| e.reasons.clone())
            .unwrap_or_default()
    }

    /// Recompute `can_start` and `can_complete` for every activity.
    pub fn refresh_flags(&mut self, resolver: &DependencyResolver) {
        self.eligibility = resolver.evaluate_phase(self.template, &self.statuses());
        for (name, activity) in &mut self.activities {
            let can_start = self
                .eligibility
                .get(name)
                .is_some_and(|e| e.can_start);
            let can_complete = activity.status == ActivityStatus::InProgress;
            if activity.can_start != can_start || activity.can_complete != can_complete {
                activity.can_start = can_start;
                activity.can_complete = can_complete;
                activity.updated_at = self.now;
                self.dirty.insert(name.clone());
            }
        }
    }

    /// Apply one status change, validated against the transition table.
    pub fn transition(
        &mut self,
        activity: &str,
        to: ActivityStatus,
        actor: &Actor,
        note: Option<String>,
        automatic: bool,
    ) -> DomainResult<()> {
        let now = self.now;
        let key = self.key(activity);
        let instance = self
            .activities
            .get_mut(activity)
            .ok_or_else(|| DomainError::ActivityNotFound(key.to_string()))?;

        let from = instance.status;
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let action = match to {
            ActivityStatus::InProgress if from == ActivityStatus::Blocked => AuditAction::ActivityResumed,
            ActivityStatus::InProgress => AuditAction::ActivityStarted,
            ActivityStatus::Completed => AuditAction::ActivityCompleted,
            ActivityStatus::Blocked => AuditAction::ActivityBlocked,
            ActivityStatus::Skipped => AuditAction::ActivitySkipped,
            ActivityStatus::RevisionRequested => AuditAction::RevisionRequested,
            ActivityStatus::NotStarted => {
                return Err(DomainError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }
        };

        match to {
            ActivityStatus::InProgress => {
                instance.started_at = Some(now);
                instance.started_by = Some(actor.id.clone());
                instance.blocked_reason = None;
            }
            ActivityStatus::Completed => {
                instance.completed_at = Some(now);
                instance.completed_by = Some(actor.id.clone());
            }
            ActivityStatus::Blocked => {
                instance.blocked_reason = note.clone();
            }
            ActivityStatus::RevisionRequested => {
                instance.revision_reason = note.clone();
                instance.completed_at = None;
                instance.completed_by = None;
            }
            ActivityStatus::Skipped | ActivityStatus::NotStarted => {}
        }
        instance.status = to;
        instance.can_complete = to == ActivityStatus::InProgress;
        instance.updated_at = now;
        let entity_id = instance.id;

        let mut entry = AuditLogEntry::new(AuditEntityType::Activity, entity_id.to_string(), action, actor.id.clone())
            .with_change(
                serde_json::json!(from.as_str()),
                serde_json::json!(to.as_str()),
            )
            .at(now);
        if let Some(note) = note {
            entry = entry.with_note(note);
        }
        self.audit.push(entry);

        self.dirty.insert(activity.to_string());
        self.changes.push(ActivityChange {
            activity: activity.to_string(),
            from,
            to,
            performed_by: actor.id.clone(),
            automatic,
        });

        if to.is_terminal() {
            self.settled_entities.push(entity_id);
        }
        // Rework waits for a fresh event rather than reusing the old one.
        if to == ActivityStatus::RevisionRequested {
            let template = self.template;
            let event = template
                .activity(activity)
                .and_then(|t| t.auto_complete_on_event.as_deref());
            if event.is_some_and(|event| self.phase.forget_event(event)) {
                self.phase.updated_at = now;
                self.phase_dirty = true;
            }
        }

        tracing::debug!(
            cycle_id = key.cycle_id,
            report_id = key.report_id,
            phase = %key.phase.as_str(),
            activity = %activity,
            from = %from,
            to = %to,
            automatic,
            "activity transition"
        );

        if to == ActivityStatus::InProgress && self.phase.status == PhaseStatus::NotStarted {
            self.start_phase(actor);
        }

        Ok(())
    }

    fn start_phase(&mut self, actor: &Actor) {
        self.phase.status = PhaseStatus::InProgress;
        self.phase.actual_start = Some(self.now);
        self.phase.started_by = Some(actor.id.clone());
        self.phase.updated_at = self.now;
        self.phase_dirty = true;
        self.audit.push(
            AuditLogEntry::new(
                AuditEntityType::Phase,
                self.phase.id.to_string(),
                AuditAction::PhaseStarted,
                actor.id.clone(),
            )
            .with_change(
                serde_json::json!(PhaseStatus::NotStarted.as_str()),
                serde_json::json!(PhaseStatus::InProgress.as_str()),
            )
            .at(self.now),
        );
    }

    /// Every non-optional activity of the template is completed or skipped.
    pub fn all_required_settled(&self) -> bool {
        self.template
            .activities
            .iter()
            .filter(|t| !t.is_optional)
            .all(|t| {
                self.activities
                    .get(&t.name)
                    .is_some_and(|a| a.status.is_terminal())
            })
    }

    /// Complete the phase once every required activity is done, or reopen a
    /// completed phase whose required work was sent back.
    pub fn reconcile_phase_status(&mut self, actor: &Actor) {
        let done = self.all_required_settled();
        let previous = self.phase.status;

        if done && previous != PhaseStatus::Complete {
            if self.phase.actual_start.is_none() {
                self.phase.actual_start = Some(self.now);
            }
            self.phase.status = PhaseStatus::Complete;
            self.phase.actual_end = Some(self.now);
            self.phase.completed_by = Some(actor.id.clone());
            self.phase.updated_at = self.now;
            self.phase_dirty = true;
            self.phase_completed = true;
            self.settled_entities.push(self.phase.id);
            self.audit.push(
                AuditLogEntry::new(
                    AuditEntityType::Phase,
                    self.phase.id.to_string(),
                    AuditAction::PhaseCompleted,
                    actor.id.clone(),
                )
                .with_change(
                    serde_json::json!(previous.as_str()),
                    serde_json::json!(PhaseStatus::Complete.as_str()),
                )
                .at(self.now),
            );
            self.signals.push(OutboundSignal::PhaseCompleted {
                cycle_id: self.phase.cycle_id,
                report_id: self.phase.report_id,
                phase: self.phase.phase,
            });
            tracing::info!(
                cycle_id = self.phase.cycle_id,
                report_id = self.phase.report_id,
                phase = %self.phase.phase.as_str(),
                "phase completed"
            );
        } else if !done && previous == PhaseStatus::Complete {
            self.phase.status = PhaseStatus::InProgress;
            self.phase.actual_end = None;
            self.phase.completed_by = None;
            self.phase.updated_at = self.now;
            self.phase_dirty = true;
            self.phase_reopened = true;
            self.audit.push(
                AuditLogEntry::new(
                    AuditEntityType::Phase,
                    self.phase.id.to_string(),
                    AuditAction::PhaseReopened,
                    actor.id.clone(),
                )
                .with_change(
                    serde_json::json!(PhaseStatus::Complete.as_str()),
                    serde_json::json!(PhaseStatus::InProgress.as_str()),
                )
                .at(self.now),
            );
            tracing::info!(
                cycle_id = self.phase.cycle_id,
                report_id = self.phase.report_id,
                phase = %self.phase.phase.as_str(),
                "phase reopened"
            );
        }
    }

    /// Record an external event in `phase_data`. Returns false if it was
    /// already recorded.
    pub fn record_event(&mut self, event: &str, actor: &Actor) -> bool {
        if !self.phase.record_event(event) {
            return false;
        }
        self.phase.updated_at = self.now;
        self.phase_dirty = true;
        self.audit.push(
            AuditLogEntry::new(
                AuditEntityType::Phase,
                self.phase.id.to_string(),
                AuditAction::DomainEventRecorded,
                actor.id.clone(),
            )
            .with_new_value(serde_json::json!(event))
            .at(self.now),
        );
        true
    }

    /// Set planned dates on the phase.
    pub fn schedule(
        &mut self,
        planned_start: Option<DateTime<Utc>>,
        planned_end: Option<DateTime<Utc>>,
        actor: &Actor,
    ) {
        let old = serde_json::json!({
            "planned_start": self.phase.planned_start,
            "planned_end": self.phase.planned_end,
        });
        self.phase.planned_start = planned_start;
        self.phase.planned_end = planned_end;
        self.phase.updated_at = self.now;
        self.phase_dirty = true;
        self.audit.push(
            AuditLogEntry::new(
                AuditEntityType::Phase,
                self.phase.id.to_string(),
                AuditAction::PhaseScheduled,
                actor.id.clone(),
            )
            .with_change(
                old,
                serde_json::json!({
                    "planned_start": planned_start,
                    "planned_end": planned_end,
                }),
            )
            .at(self.now),
        );
    }

    /// Rows touched so far.
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet {
            phases: if self.phase_dirty {
                vec![self.phase.clone()]
            } else {
                Vec::new()
            },
            activities: self
                .dirty
                .iter()
                .filter_map(|name| self.activities.get(name).cloned())
                .collect(),
        }
    }

    /// All instances, for inserting a freshly registered workflow.
    pub fn into_instances(self) -> (PhaseInstance, Vec<ActivityInstance>) {
        (self.phase, self.activities.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PhaseName, WorkflowKey};
    use crate::services::template_catalog::TemplateCatalog;

    fn scoping_state(catalog: &TemplateCatalog) -> PhaseState<'_> {
        let template = catalog.get_phase_template(PhaseName::Scoping).unwrap();
        let key = WorkflowKey::new(1, 1);
        let phase = PhaseInstance::new(key, PhaseName::Scoping);
        let activities = template
            .activities
            .iter()
            .map(|a| ActivityInstance::new(key, PhaseName::Scoping, a.name.clone()))
            .collect();
        PhaseState::new(template, phase, activities, Utc::now())
    }

    #[test]
    fn test_first_start_opens_phase() {
        let catalog = TemplateCatalog::builtin().unwrap();
        let mut state = scoping_state(&catalog);
        let actor = Actor::with_role("t1", crate::domain::models::Role::Tester);

        state
            .transition("Start", ActivityStatus::InProgress, &actor, None, false)
            .unwrap();

        assert_eq!(state.phase.status, PhaseStatus::InProgress);
        assert_eq!(state.phase.started_by.as_deref(), Some("t1"));
        assert_eq!(state.audit.len(), 2);
        assert_eq!(state.change_set().phases.len(), 1);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let catalog = TemplateCatalog::builtin().unwrap();
        let mut state = scoping_state(&catalog);
        let err = state
            .transition("Start", ActivityStatus::Completed, &Actor::system(), None, false)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert!(state.audit.is_empty());
    }

    #[test]
    fn test_refresh_marks_only_changed_rows() {
        let catalog = TemplateCatalog::builtin().unwrap();
        let resolver = DependencyResolver::new();
        let mut state = scoping_state(&catalog);

        state.refresh_flags(&resolver);
        assert_eq!(state.change_set().activities.len(), 1);
        assert!(state.get("Start").unwrap().can_start);
        assert!(!state.get("Define Scope").unwrap().can_start);
    }
}
