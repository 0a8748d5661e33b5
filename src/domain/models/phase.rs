//! Workflow phase instance domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::template::PhaseName;

/// Identifies one workflow: a test cycle applied to a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowKey {
    pub cycle_id: i64,
    pub report_id: i64,
}

impl WorkflowKey {
    pub fn new(cycle_id: i64, report_id: i64) -> Self {
        Self { cycle_id, report_id }
    }
}

impl std::fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cycle {} / report {}", self.cycle_id, self.report_id)
    }
}

/// Status of a phase instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Complete,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "complete" | "completed" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Key in `phase_data` listing external events received for the phase.
pub const RECEIVED_EVENTS_KEY: &str = "received_events";

/// A phase of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInstance {
    pub id: Uuid,
    pub cycle_id: i64,
    pub report_id: i64,
    pub phase: PhaseName,
    pub status: PhaseStatus,
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
    pub completed_by: Option<String>,
    /// Phase-private bookkeeping. Always a JSON object.
    pub phase_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl PhaseInstance {
    pub fn new(workflow: WorkflowKey, phase: PhaseName) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cycle_id: workflow.cycle_id,
            report_id: workflow.report_id,
            phase,
            status: PhaseStatus::NotStarted,
            planned_start: None,
            planned_end: None,
            actual_start: None,
            actual_end: None,
            started_by: None,
            completed_by: None,
            phase_data: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn workflow(&self) -> WorkflowKey {
        WorkflowKey::new(self.cycle_id, self.report_id)
    }

    /// External events recorded against this phase.
    pub fn received_events(&self) -> Vec<String> {
        self.phase_data
            .get(RECEIVED_EVENTS_KEY)
            .and_then(|v| v.as_array())
            .map(|events| {
                events
                    .iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_received(&self, event: &str) -> bool {
        self.received_events().iter().any(|e| e == event)
    }

    /// Record an external event. Returns false if it was already recorded.
    pub fn record_event(&mut self, event: &str) -> bool {
        if self.has_received(event) {
            return false;
        }
        if !self.phase_data.is_object() {
            self.phase_data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.phase_data.as_object_mut() {
            let entry = map
                .entry(RECEIVED_EVENTS_KEY)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let Some(events) = entry.as_array_mut() {
                events.push(serde_json::Value::String(event.to_string()));
                return true;
            }
        }
        false
    }

    /// Drop a recorded event. Returns false if it was not recorded.
    pub fn forget_event(&mut self, event: &str) -> bool {
        let Some(events) = self
            .phase_data
            .get_mut(RECEIVED_EVENTS_KEY)
            .and_then(|v| v.as_array_mut())
        else {
            return false;
        };
        let before = events.len();
        events.retain(|e| e.as_str() != Some(event));
        events.len() != before
    }

    /// Boolean flag stored in `phase_data`; anything but `true` reads as false.
    pub fn flag(&self, key: &str) -> bool {
        self.phase_data
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_event_is_deduplicated() {
        let mut phase = PhaseInstance::new(WorkflowKey::new(1, 1), PhaseName::DataProfiling);
        assert!(phase.record_event("profiling.executed"));
        assert!(!phase.record_event("profiling.executed"));
        assert_eq!(phase.received_events(), vec!["profiling.executed".to_string()]);
    }

    #[test]
    fn test_forget_event_allows_rerecording() {
        let mut phase = PhaseInstance::new(WorkflowKey::new(1, 1), PhaseName::TestExecution);
        assert!(!phase.forget_event("tests.executed"));
        phase.record_event("tests.executed");
        phase.record_event("tests.reviewed");
        assert!(phase.forget_event("tests.executed"));
        assert_eq!(phase.received_events(), vec!["tests.reviewed".to_string()]);
        assert!(phase.record_event("tests.executed"));
    }

    #[test]
    fn test_flag_defaults_false() {
        let mut phase = PhaseInstance::new(WorkflowKey::new(1, 1), PhaseName::Planning);
        assert!(!phase.flag("preloaded"));
        phase.phase_data = serde_json::json!({ "preloaded": true, "other": "yes" });
        assert!(phase.flag("preloaded"));
        assert!(!phase.flag("other"));
    }
}
