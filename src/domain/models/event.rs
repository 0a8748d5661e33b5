//! Inbound events and outbound signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::{ActivityKey, Actor};
use super::phase::WorkflowKey;
use super::sla::{SlaTarget, SlaViolation};
use super::template::{PhaseName, Role};

/// Payload shared by every `activity.*` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub activity: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<Role>,
    /// Required for revision requests; optional for skip and block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ActivityEvent {
    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.cycle_id, self.report_id, self.phase, self.activity.clone())
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.actor_id.clone(), self.actor_role)
    }
}

/// A completion signal from a domain collaborator, e.g. "profiling.executed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSignalEvent {
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub signal: String,
    #[serde(default = "default_signal_actor")]
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

fn default_signal_actor() -> String {
    super::activity::SYSTEM_ACTOR_ID.to_string()
}

impl DomainSignalEvent {
    pub fn workflow(&self) -> WorkflowKey {
        WorkflowKey::new(self.cycle_id, self.report_id)
    }
}

/// Requests arriving from UI actions and domain collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum InboundEvent {
    #[serde(rename = "activity.start")]
    Start(ActivityEvent),
    #[serde(rename = "activity.complete")]
    Complete(ActivityEvent),
    #[serde(rename = "activity.request_revision")]
    RequestRevision(ActivityEvent),
    #[serde(rename = "activity.skip")]
    Skip(ActivityEvent),
    #[serde(rename = "activity.block")]
    Block(ActivityEvent),
    #[serde(rename = "domain.signal")]
    DomainSignal(DomainSignalEvent),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "activity.start",
            Self::Complete(_) => "activity.complete",
            Self::RequestRevision(_) => "activity.request_revision",
            Self::Skip(_) => "activity.skip",
            Self::Block(_) => "activity.block",
            Self::DomainSignal(_) => "domain.signal",
        }
    }

    pub fn workflow(&self) -> WorkflowKey {
        match self {
            Self::Start(e)
            | Self::Complete(e)
            | Self::RequestRevision(e)
            | Self::Skip(e)
            | Self::Block(e) => WorkflowKey::new(e.cycle_id, e.report_id),
            Self::DomainSignal(e) => e.workflow(),
        }
    }
}

/// Notifications for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum OutboundSignal {
    #[serde(rename = "escalation.raised")]
    EscalationRaised {
        violation: SlaViolation,
        level: u32,
        notify_role: Role,
    },
    #[serde(rename = "phase.completed")]
    PhaseCompleted {
        cycle_id: i64,
        report_id: i64,
        phase: PhaseName,
    },
    #[serde(rename = "sla.warning")]
    SlaWarning {
        target: SlaTarget,
        due_at: DateTime<Utc>,
    },
}

impl OutboundSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EscalationRaised { .. } => "escalation.raised",
            Self::PhaseCompleted { .. } => "phase.completed",
            Self::SlaWarning { .. } => "sla.warning",
        }
    }
}
