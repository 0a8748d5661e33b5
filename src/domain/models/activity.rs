//! Activity instance domain model.
//!
//! One row per (cycle, report, phase, activity). Rows are created once when a
//! workflow is registered and are only ever mutated by the transition engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::WorkflowKey;
use super::template::{PhaseName, Role};

/// Status of an activity instance.
///
/// ```text
/// NotStarted → InProgress → Completed → RevisionRequested → InProgress
///     ↘ Skipped     ↕ Blocked
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    NotStarted,
    InProgress,
    Completed,
    RevisionRequested,
    Blocked,
    Skipped,
}

impl Default for ActivityStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::RevisionRequested => "revision_requested",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not_started" | "pending" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "revision_requested" => Some(Self::RevisionRequested),
            "blocked" => Some(Self::Blocked),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Completed or skipped. Completed may still be reopened by a revision.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Still owes work (subject to SLA tracking).
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    /// States from which `start` moves the activity into progress.
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Blocked | Self::RevisionRequested)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<ActivityStatus> {
        match self {
            Self::NotStarted => vec![Self::InProgress, Self::Skipped],
            Self::InProgress => vec![Self::Completed, Self::Blocked],
            Self::Blocked => vec![Self::InProgress],
            Self::Completed => vec![Self::RevisionRequested],
            Self::RevisionRequested => vec![Self::InProgress],
            Self::Skipped => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Identifier used for engine-initiated actions.
pub const SYSTEM_ACTOR_ID: &str = "system";

impl Actor {
    pub fn new(id: impl Into<String>, role: Option<Role>) -> Self {
        Self { id: id.into(), role }
    }

    pub fn with_role(id: impl Into<String>, role: Role) -> Self {
        Self::new(id, Some(role))
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR_ID, None)
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_ACTOR_ID
    }
}

/// Natural key of an activity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub activity: String,
}

impl ActivityKey {
    pub fn new(cycle_id: i64, report_id: i64, phase: PhaseName, activity: impl Into<String>) -> Self {
        Self {
            cycle_id,
            report_id,
            phase,
            activity: activity.into(),
        }
    }

    pub fn workflow(&self) -> WorkflowKey {
        WorkflowKey::new(self.cycle_id, self.report_id)
    }
}

impl std::fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.cycle_id,
            self.report_id,
            self.phase.as_str(),
            self.activity
        )
    }
}

/// An activity of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInstance {
    pub id: Uuid,
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub activity_name: String,
    pub status: ActivityStatus,
    /// Cached: every dependency edge is currently satisfied.
    pub can_start: bool,
    /// Cached: the activity is in progress and may be completed.
    pub can_complete: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub revision_reason: Option<String>,
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Version for compare-and-swap updates.
    pub version: i64,
}

impl ActivityInstance {
    pub fn new(workflow: WorkflowKey, phase: PhaseName, activity_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cycle_id: workflow.cycle_id,
            report_id: workflow.report_id,
            phase,
            activity_name: activity_name.into(),
            status: ActivityStatus::NotStarted,
            can_start: false,
            can_complete: false,
            started_at: None,
            started_by: None,
            completed_at: None,
            completed_by: None,
            revision_reason: None,
            blocked_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.cycle_id, self.report_id, self.phase, self.activity_name.clone())
    }

    pub fn workflow(&self) -> WorkflowKey {
        WorkflowKey::new(self.cycle_id, self.report_id)
    }

    /// Whether someone could act on this activity right now.
    pub fn is_actionable(&self) -> bool {
        (self.can_start && self.status.is_startable()) || self.can_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ActivityStatus::*;
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(NotStarted.can_transition_to(Skipped));
        assert!(!NotStarted.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(InProgress));
        assert!(Completed.can_transition_to(RevisionRequested));
        assert!(RevisionRequested.can_transition_to(InProgress));
        assert!(!RevisionRequested.can_transition_to(Completed));
        assert!(Skipped.valid_transitions().is_empty());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(ActivityStatus::from_str("COMPLETED"), Some(ActivityStatus::Completed));
        assert_eq!(ActivityStatus::from_str("revision_requested"), Some(ActivityStatus::RevisionRequested));
        assert_eq!(ActivityStatus::from_str("nope"), None);
    }

    #[test]
    fn test_actionable() {
        let mut activity = ActivityInstance::new(WorkflowKey::new(1, 2), PhaseName::Scoping, "Define Scope");
        assert!(!activity.is_actionable());
        activity.can_start = true;
        assert!(activity.is_actionable());
        activity.status = ActivityStatus::Completed;
        assert!(!activity.is_actionable());
    }

    #[test]
    fn test_key_display() {
        let key = ActivityKey::new(21, 156, PhaseName::DataProfiling, "Upload Data Files");
        assert_eq!(key.to_string(), "21/156/data_profiling/Upload Data Files");
    }
}
