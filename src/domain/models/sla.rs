//! SLA configuration and violation tracking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::template::{ActivityType, PhaseName, Role};

/// What an SLA configuration applies to within its phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlaScope {
    /// The phase itself.
    Phase,
    /// Every activity of the given type in the phase.
    ActivityType { activity_type: ActivityType },
    /// One named activity.
    Activity { name: String },
}

/// Upper bound on any configured SLA, warning or escalation delay: ten years.
pub const MAX_SLA_HOURS: i64 = 24 * 365 * 10;

fn hours_after(at: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    Duration::try_hours(hours).and_then(|d| at.checked_add_signed(d))
}

/// One rung of the escalation ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRung {
    pub level: u32,
    /// Hours past the due time at which this rung fires. Zero fires on breach.
    pub hours_after_breach: i64,
    pub notify_role: Role,
}

/// Static deadline and escalation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfiguration {
    pub phase: PhaseName,
    pub scope: SlaScope,
    pub sla_hours: i64,
    /// Hours after the anchor at which a one-off warning is emitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_hours: Option<i64>,
    #[serde(default)]
    pub escalation: Vec<EscalationRung>,
}

impl SlaConfiguration {
    pub fn new(phase: PhaseName, scope: SlaScope, sla_hours: i64) -> Self {
        Self {
            phase,
            scope,
            sla_hours,
            warning_hours: None,
            escalation: Vec::new(),
        }
    }

    pub fn with_warning(mut self, hours: i64) -> Self {
        self.warning_hours = Some(hours);
        self
    }

    pub fn with_rung(mut self, level: u32, hours_after_breach: i64, notify_role: Role) -> Self {
        self.escalation.push(EscalationRung {
            level,
            hours_after_breach,
            notify_role,
        });
        self
    }

    /// Higher is more specific; used to pick between overlapping configs.
    pub fn specificity(&self) -> u8 {
        match self.scope {
            SlaScope::Phase => 0,
            SlaScope::ActivityType { .. } => 1,
            SlaScope::Activity { .. } => 2,
        }
    }

    pub fn applies_to_activity(&self, name: &str, activity_type: ActivityType) -> bool {
        match &self.scope {
            SlaScope::Phase => false,
            SlaScope::ActivityType { activity_type: t } => *t == activity_type,
            SlaScope::Activity { name: n } => n == name,
        }
    }

    /// Deadline for work anchored at `anchor`. `None` when it falls outside
    /// the representable calendar.
    pub fn due_from(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        hours_after(anchor, self.sla_hours)
    }

    /// Ladder sorted by firing time.
    pub fn ordered_ladder(&self) -> Vec<&EscalationRung> {
        let mut ladder: Vec<&EscalationRung> = self.escalation.iter().collect();
        ladder.sort_by_key(|r| (r.hours_after_breach, r.level));
        ladder
    }
}

/// Whether a violation tracks a phase or an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaTargetKind {
    Phase,
    Activity,
}

impl SlaTargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Activity => "activity",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "phase" => Some(Self::Phase),
            "activity" => Some(Self::Activity),
            _ => None,
        }
    }
}

/// Resolution state of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    Open,
    Resolved,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// The phase or activity instance a deadline applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlaTarget {
    pub kind: SlaTargetKind,
    pub entity_id: Uuid,
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub activity_name: Option<String>,
}

impl std::fmt::Display for SlaTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.activity_name {
            Some(activity) => write!(
                f,
                "{}/{}/{}/{}",
                self.cycle_id,
                self.report_id,
                self.phase.as_str(),
                activity
            ),
            None => write!(f, "{}/{}/{}", self.cycle_id, self.report_id, self.phase.as_str()),
        }
    }
}

/// A missed deadline and its escalation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub id: Uuid,
    pub target_kind: SlaTargetKind,
    /// Id of the phase or activity instance.
    pub entity_id: Uuid,
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub activity_name: Option<String>,
    pub due_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub escalation_level: u32,
    pub escalation_count: u32,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub status: ViolationStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl SlaViolation {
    pub fn open(target: SlaTarget, due_at: DateTime<Utc>, detected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_kind: target.kind,
            entity_id: target.entity_id,
            cycle_id: target.cycle_id,
            report_id: target.report_id,
            phase: target.phase,
            activity_name: target.activity_name,
            due_at,
            detected_at,
            escalation_level: 0,
            escalation_count: 0,
            last_escalated_at: None,
            status: ViolationStatus::Open,
            resolved_at: None,
            version: 0,
        }
    }

    pub fn target(&self) -> SlaTarget {
        SlaTarget {
            kind: self.target_kind,
            entity_id: self.entity_id,
            cycle_id: self.cycle_id,
            report_id: self.report_id,
            phase: self.phase,
            activity_name: self.activity_name.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ViolationStatus::Open
    }

    /// Advance past every rung crossed by `now` that is above the current
    /// level. Returns the rungs crossed, in firing order. The level never
    /// goes down.
    pub fn advance_ladder<'a>(
        &mut self,
        ladder: &[&'a EscalationRung],
        now: DateTime<Utc>,
    ) -> Vec<&'a EscalationRung> {
        if !self.is_open() {
            return Vec::new();
        }

        let overdue = now - self.due_at;
        let mut crossed = Vec::new();
        for rung in ladder {
            if rung.level <= self.escalation_level {
                continue;
            }
            let reached = Duration::try_hours(rung.hours_after_breach).is_some_and(|after| overdue >= after);
            if reached {
                self.escalation_level = rung.level;
                self.escalation_count += 1;
                self.last_escalated_at = Some(now);
                crossed.push(*rung);
            }
        }
        crossed
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) {
        if self.is_open() {
            self.status = ViolationStatus::Resolved;
            self.resolved_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_owner_sla() -> SlaConfiguration {
        SlaConfiguration::new(
            PhaseName::DataProviderIdentification,
            SlaScope::Activity {
                name: "Data Owner Assignment".to_string(),
            },
            24,
        )
        .with_rung(1, 0, Role::DataExecutive)
        .with_rung(2, 24, Role::TestExecutive)
    }

    fn violation(due_at: DateTime<Utc>) -> SlaViolation {
        let target = SlaTarget {
            kind: SlaTargetKind::Activity,
            entity_id: Uuid::new_v4(),
            cycle_id: 1,
            report_id: 1,
            phase: PhaseName::DataProviderIdentification,
            activity_name: Some("Data Owner Assignment".to_string()),
        };
        SlaViolation::open(target, due_at, due_at)
    }

    #[test]
    fn test_ladder_advances_one_rung_at_a_time() {
        let config = data_owner_sla();
        let ladder = config.ordered_ladder();
        let start = Utc::now();
        let due = config.due_from(start).unwrap();
        let mut v = violation(due);

        let crossed = v.advance_ladder(&ladder, start + Duration::hours(30));
        assert_eq!(crossed.len(), 1);
        assert_eq!(v.escalation_level, 1);
        assert_eq!(v.escalation_count, 1);

        let crossed = v.advance_ladder(&ladder, start + Duration::hours(40));
        assert!(crossed.is_empty());
        assert_eq!(v.escalation_level, 1);

        let crossed = v.advance_ladder(&ladder, start + Duration::hours(50));
        assert_eq!(crossed.len(), 1);
        assert_eq!(v.escalation_level, 2);
        assert_eq!(v.escalation_count, 2);
    }

    #[test]
    fn test_ladder_catches_up_multiple_rungs() {
        let config = data_owner_sla();
        let ladder = config.ordered_ladder();
        let start = Utc::now();
        let mut v = violation(config.due_from(start).unwrap());

        let crossed = v.advance_ladder(&ladder, start + Duration::hours(72));
        assert_eq!(crossed.len(), 2);
        assert_eq!(v.escalation_level, 2);
        assert_eq!(v.escalation_count, 2);
    }

    #[test]
    fn test_resolved_violation_does_not_escalate() {
        let config = data_owner_sla();
        let ladder = config.ordered_ladder();
        let start = Utc::now();
        let mut v = violation(config.due_from(start).unwrap());
        v.resolve(start + Duration::hours(25));

        assert!(v.advance_ladder(&ladder, start + Duration::hours(60)).is_empty());
        assert_eq!(v.escalation_level, 0);
        assert!(v.resolved_at.is_some());
    }

    #[test]
    fn test_out_of_range_hours_do_not_panic() {
        let start = Utc::now();
        let huge = SlaConfiguration::new(PhaseName::Scoping, SlaScope::Phase, i64::MAX / 2)
            .with_rung(1, i64::MAX / 2, Role::TestExecutive);
        assert_eq!(huge.due_from(start), None);

        let mut v = violation(start);
        assert!(v.advance_ladder(&huge.ordered_ladder(), start + Duration::hours(1)).is_empty());
        assert_eq!(v.escalation_level, 0);
    }

    #[test]
    fn test_specificity_ordering() {
        let phase = SlaConfiguration::new(PhaseName::Scoping, SlaScope::Phase, 72);
        let typed = SlaConfiguration::new(
            PhaseName::Scoping,
            SlaScope::ActivityType {
                activity_type: ActivityType::Approval,
            },
            48,
        );
        let named = data_owner_sla();
        assert!(phase.specificity() < typed.specificity());
        assert!(typed.specificity() < named.specificity());
        assert!(typed.applies_to_activity("Report Owner Approval", ActivityType::Approval));
        assert!(!phase.applies_to_activity("Report Owner Approval", ActivityType::Approval));
    }
}
