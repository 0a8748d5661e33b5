//! Audit log entries.
//!
//! Entries are append-only: once written they are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entity an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Workflow,
    Phase,
    Activity,
    SlaViolation,
}

impl AuditEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Phase => "phase",
            Self::Activity => "activity",
            Self::SlaViolation => "sla_violation",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "workflow" => Some(Self::Workflow),
            "phase" => Some(Self::Phase),
            "activity" => Some(Self::Activity),
            "sla_violation" | "violation" => Some(Self::SlaViolation),
            _ => None,
        }
    }
}

/// Type of recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Workflow actions
    WorkflowRegistered,

    // Activity actions
    ActivityStarted,
    ActivityResumed,
    ActivityCompleted,
    ActivityBlocked,
    ActivitySkipped,
    RevisionRequested,

    // Phase actions
    PhaseStarted,
    PhaseCompleted,
    PhaseReopened,
    PhaseScheduled,
    DomainEventRecorded,

    // SLA actions
    ViolationOpened,
    EscalationRaised,
    ViolationResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowRegistered => "workflow_registered",
            Self::ActivityStarted => "activity_started",
            Self::ActivityResumed => "activity_resumed",
            Self::ActivityCompleted => "activity_completed",
            Self::ActivityBlocked => "activity_blocked",
            Self::ActivitySkipped => "activity_skipped",
            Self::RevisionRequested => "revision_requested",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::PhaseReopened => "phase_reopened",
            Self::PhaseScheduled => "phase_scheduled",
            Self::DomainEventRecorded => "domain_event_recorded",
            Self::ViolationOpened => "violation_opened",
            Self::EscalationRaised => "escalation_raised",
            Self::ViolationResolved => "violation_resolved",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "workflow_registered" => Some(Self::WorkflowRegistered),
            "activity_started" => Some(Self::ActivityStarted),
            "activity_resumed" => Some(Self::ActivityResumed),
            "activity_completed" => Some(Self::ActivityCompleted),
            "activity_blocked" => Some(Self::ActivityBlocked),
            "activity_skipped" => Some(Self::ActivitySkipped),
            "revision_requested" => Some(Self::RevisionRequested),
            "phase_started" => Some(Self::PhaseStarted),
            "phase_completed" => Some(Self::PhaseCompleted),
            "phase_reopened" => Some(Self::PhaseReopened),
            "phase_scheduled" => Some(Self::PhaseScheduled),
            "domain_event_recorded" => Some(Self::DomainEventRecorded),
            "violation_opened" => Some(Self::ViolationOpened),
            "escalation_raised" => Some(Self::EscalationRaised),
            "violation_resolved" => Some(Self::ViolationResolved),
            _ => None,
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    /// Free-text context, e.g. why the engine acted automatically.
    pub note: Option<String>,
}

impl AuditLogEntry {
    pub fn new(
        entity_type: AuditEntityType,
        entity_id: impl Into<String>,
        action: AuditAction,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id: entity_id.into(),
            action,
            old_value: None,
            new_value: None,
            performed_by: performed_by.into(),
            performed_at: Utc::now(),
            note: None,
        }
    }

    /// Set state transition.
    pub fn with_change(mut self, old: serde_json::Value, new: serde_json::Value) -> Self {
        self.old_value = Some(old);
        self.new_value = Some(new);
        self
    }

    pub fn with_new_value(mut self, new: serde_json::Value) -> Self {
        self.new_value = Some(new);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn at(mut self, performed_at: DateTime<Utc>) -> Self {
        self.performed_at = performed_at;
        self
    }
}

/// Filter for querying audit logs.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<AuditEntityType>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub performed_by: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_entity(entity_type: AuditEntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.performed_by = Some(actor.into());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an entry matches this filter.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(entity_type) = self.entity_type {
            if entry.entity_type != entity_type {
                return false;
            }
        }

        if let Some(ref entity_id) = self.entity_id {
            if &entry.entity_id != entity_id {
                return false;
            }
        }

        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }

        if let Some(ref actor) = self.performed_by {
            if &entry.performed_by != actor {
                return false;
            }
        }

        if let Some(from) = self.from {
            if entry.performed_at < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if entry.performed_at > to {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let entry = AuditLogEntry::new(
            AuditEntityType::Activity,
            "abc",
            AuditAction::ActivityStarted,
            "tester-1",
        )
        .with_change(serde_json::json!("not_started"), serde_json::json!("in_progress"))
        .with_note("manual start");

        assert_eq!(entry.old_value, Some(serde_json::json!("not_started")));
        assert_eq!(entry.new_value, Some(serde_json::json!("in_progress")));
        assert_eq!(entry.note.as_deref(), Some("manual start"));
    }

    #[test]
    fn test_filter_matches() {
        let entry = AuditLogEntry::new(
            AuditEntityType::Activity,
            "abc",
            AuditAction::ActivityCompleted,
            "system",
        );

        assert!(AuditFilter::for_entity(AuditEntityType::Activity, "abc").matches(&entry));
        assert!(!AuditFilter::for_entity(AuditEntityType::Phase, "abc").matches(&entry));
        assert!(!AuditFilter::new()
            .with_action(AuditAction::ActivitySkipped)
            .matches(&entry));
        assert!(AuditFilter::new().with_actor("system").matches(&entry));
    }

    #[test]
    fn test_action_round_trip() {
        for action in [
            AuditAction::WorkflowRegistered,
            AuditAction::RevisionRequested,
            AuditAction::EscalationRaised,
            AuditAction::PhaseReopened,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()), Some(action));
        }
    }
}
