//! Argument types shared across commands.

use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;

use crate::domain::models::{ActivityKey, Actor, AuditEntityType, PhaseName, Role, WorkflowKey};

pub fn parse_phase(s: &str) -> Result<PhaseName, String> {
    PhaseName::from_str(s).ok_or_else(|| {
        let known: Vec<&str> = PhaseName::ALL.iter().map(PhaseName::as_str).collect();
        format!("unknown phase '{s}' (expected one of: {})", known.join(", "))
    })
}

pub fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_str(s).ok_or_else(|| format!("unknown role '{s}'"))
}

pub fn parse_entity_type(s: &str) -> Result<AuditEntityType, String> {
    AuditEntityType::from_str(s).ok_or_else(|| format!("unknown entity type '{s}'"))
}

/// Accepts RFC3339 or a plain date (midnight UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid timestamp '{s}' (use RFC3339 or YYYY-MM-DD)"))
}

/// Cycle and report identifying a workflow.
#[derive(Args, Debug, Clone, Copy)]
pub struct WorkflowTarget {
    /// Test cycle id
    pub cycle_id: i64,
    /// Report id
    pub report_id: i64,
}

impl WorkflowTarget {
    pub fn key(&self) -> WorkflowKey {
        WorkflowKey::new(self.cycle_id, self.report_id)
    }
}

/// Cycle, report, phase and activity name.
#[derive(Args, Debug, Clone)]
pub struct ActivityTarget {
    /// Test cycle id
    pub cycle_id: i64,
    /// Report id
    pub report_id: i64,
    /// Phase name, e.g. scoping or "Data Profiling"
    #[arg(value_parser = parse_phase)]
    pub phase: PhaseName,
    /// Activity name as it appears in the catalog
    pub activity: String,
}

impl ActivityTarget {
    pub fn key(&self) -> ActivityKey {
        ActivityKey::new(self.cycle_id, self.report_id, self.phase, self.activity.clone())
    }
}

/// Who is performing the action.
#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// Acting user id
    #[arg(long, default_value = "cli")]
    pub actor: String,
    /// Acting user's role; required for approval activities
    #[arg(long, value_parser = parse_role)]
    pub role: Option<Role>,
}

impl ActorArgs {
    pub fn actor(&self) -> Actor {
        Actor::new(self.actor.clone(), self.role)
    }
}
