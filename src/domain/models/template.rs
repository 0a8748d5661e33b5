//! Phase and activity template definitions.
//!
//! Templates are immutable configuration: they describe which activities a
//! phase contains, in which order, who may act on them and how they depend on
//! each other. Workflow instances read templates but never mutate them.

use serde::{Deserialize, Serialize};

/// The nine ordered phases of a test cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Planning,
    DataProfiling,
    Scoping,
    SampleSelection,
    DataProviderIdentification,
    RequestForInformation,
    TestExecution,
    ObservationManagement,
    FinalizeReport,
}

impl PhaseName {
    /// All phases in execution order.
    pub const ALL: [PhaseName; 9] = [
        Self::Planning,
        Self::DataProfiling,
        Self::Scoping,
        Self::SampleSelection,
        Self::DataProviderIdentification,
        Self::RequestForInformation,
        Self::TestExecution,
        Self::ObservationManagement,
        Self::FinalizeReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::DataProfiling => "data_profiling",
            Self::Scoping => "scoping",
            Self::SampleSelection => "sample_selection",
            Self::DataProviderIdentification => "data_provider_identification",
            Self::RequestForInformation => "request_for_information",
            Self::TestExecution => "test_execution",
            Self::ObservationManagement => "observation_management",
            Self::FinalizeReport => "finalize_report",
        }
    }

    /// Human-facing phase title.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Planning => "Planning",
            Self::DataProfiling => "Data Profiling",
            Self::Scoping => "Scoping",
            Self::SampleSelection => "Sample Selection",
            Self::DataProviderIdentification => "Data Owner/Provider Identification",
            Self::RequestForInformation => "Request for Information",
            Self::TestExecution => "Test Execution",
            Self::ObservationManagement => "Observation Management",
            Self::FinalizeReport => "Finalize Report",
        }
    }

    /// 1-based position of the phase in the cycle.
    pub fn order(&self) -> u32 {
        match self {
            Self::Planning => 1,
            Self::DataProfiling => 2,
            Self::Scoping => 3,
            Self::SampleSelection => 4,
            Self::DataProviderIdentification => 5,
            Self::RequestForInformation => 6,
            Self::TestExecution => 7,
            Self::ObservationManagement => 8,
            Self::FinalizeReport => 9,
        }
    }

    /// Parse either the storage name or the display name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s
            .trim()
            .to_lowercase()
            .replace(['/', ' ', '-'], "_");
        match normalized.as_str() {
            "planning" => Some(Self::Planning),
            "data_profiling" => Some(Self::DataProfiling),
            "scoping" => Some(Self::Scoping),
            "sample_selection" => Some(Self::SampleSelection),
            "data_provider_identification"
            | "data_owner_provider_identification"
            | "data_owner_identification" => Some(Self::DataProviderIdentification),
            "request_for_information" | "rfi" => Some(Self::RequestForInformation),
            "test_execution" => Some(Self::TestExecution),
            "observation_management" | "observations" => Some(Self::ObservationManagement),
            "finalize_report" => Some(Self::FinalizeReport),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Kind of step an activity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Start,
    Task,
    Review,
    Approval,
    Complete,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Task => "task",
            Self::Review => "review",
            Self::Approval => "approval",
            Self::Complete => "complete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "task" => Some(Self::Task),
            "review" => Some(Self::Review),
            "approval" => Some(Self::Approval),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Business role that owns an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Tester,
    TestExecutive,
    ReportOwner,
    ReportOwnerExecutive,
    DataExecutive,
    DataOwner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tester => "tester",
            Self::TestExecutive => "test_executive",
            Self::ReportOwner => "report_owner",
            Self::ReportOwnerExecutive => "report_owner_executive",
            Self::DataExecutive => "data_executive",
            Self::DataOwner => "data_owner",
            Self::Admin => "admin",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "tester" => Some(Self::Tester),
            "test_executive" => Some(Self::TestExecutive),
            "report_owner" => Some(Self::ReportOwner),
            "report_owner_executive" => Some(Self::ReportOwnerExecutive),
            "data_executive" | "lob_executive" => Some(Self::DataExecutive),
            "data_owner" | "data_provider" => Some(Self::DataOwner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a dependency edge is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Prerequisite must be settled (completed, or skipped).
    Completion,
    /// Named approval activity must be settled.
    Approval,
    /// At least one edge of the same group must be satisfied.
    Any,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Approval => "approval",
            Self::Any => "any",
        }
    }
}

/// Predicates that can auto-skip an activity.
///
/// Deliberately a closed set: every condition the engine can act on is listed
/// here and matched exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipCondition {
    /// An active data source configuration exists for the cycle/report.
    HasActiveDataSource,
    /// The activity has prerequisites and every one of them was skipped.
    AllPrerequisitesSkipped,
    /// `phase_data[key]` is boolean `true`.
    PhaseDataFlag { key: String },
}

impl SkipCondition {
    pub fn describe(&self) -> String {
        match self {
            Self::HasActiveDataSource => "an active data source is configured".to_string(),
            Self::AllPrerequisitesSkipped => "all prerequisites were skipped".to_string(),
            Self::PhaseDataFlag { key } => format!("phase flag '{key}' is set"),
        }
    }
}

/// A single activity within a phase template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTemplate {
    pub name: String,
    pub activity_type: ActivityType,
    /// 1-based position within the phase.
    pub order: u32,
    #[serde(default = "default_true")]
    pub is_manual: bool,
    #[serde(default)]
    pub is_optional: bool,
    pub required_role: Role,
    /// External event name that completes this activity without manual action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_complete_on_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<SkipCondition>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

const fn default_true() -> bool {
    true
}

impl ActivityTemplate {
    pub fn new(
        name: impl Into<String>,
        activity_type: ActivityType,
        order: u32,
        required_role: Role,
    ) -> Self {
        Self {
            name: name.into(),
            activity_type,
            order,
            is_manual: true,
            is_optional: false,
            required_role,
            auto_complete_on_event: None,
            skip_condition: None,
            description: String::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn skip_when(mut self, condition: SkipCondition) -> Self {
        self.skip_condition = Some(condition);
        self
    }

    pub fn auto_complete_on(mut self, event: impl Into<String>) -> Self {
        self.auto_complete_on_event = Some(event.into());
        self.is_manual = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A typed prerequisite relationship between two activities of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub activity: String,
    pub depends_on: String,
    pub dependency_type: DependencyType,
    /// Alternative group for `any` edges. Ungrouped `any` edges of one
    /// activity share an implicit group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl DependencyEdge {
    pub fn completion(activity: impl Into<String>, depends_on: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            depends_on: depends_on.into(),
            dependency_type: DependencyType::Completion,
            group: None,
        }
    }

    pub fn approval(activity: impl Into<String>, depends_on: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            depends_on: depends_on.into(),
            dependency_type: DependencyType::Approval,
            group: None,
        }
    }

    pub fn any_of(
        activity: impl Into<String>,
        depends_on: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            activity: activity.into(),
            depends_on: depends_on.into(),
            dependency_type: DependencyType::Any,
            group: Some(group.into()),
        }
    }

    /// Group key used when OR-ing `any` edges.
    pub fn group_key(&self) -> &str {
        self.group.as_deref().unwrap_or("")
    }
}

/// Template for one phase: its activities and their dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub name: PhaseName,
    pub order: u32,
    pub activities: Vec<ActivityTemplate>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl PhaseTemplate {
    pub fn activity(&self, name: &str) -> Option<&ActivityTemplate> {
        self.activities.iter().find(|a| a.name == name)
    }

    /// Edges whose dependent is `activity`.
    pub fn edges_for<'a, 'b>(
        &'a self,
        activity: &'b str,
    ) -> impl Iterator<Item = &'a DependencyEdge> + 'b
    where
        'a: 'b,
    {
        self.edges.iter().filter(move |e| e.activity == activity)
    }

    /// Activities sorted by their order index.
    pub fn ordered_activities(&self) -> Vec<&ActivityTemplate> {
        let mut activities: Vec<&ActivityTemplate> = self.activities.iter().collect();
        activities.sort_by_key(|a| a.order);
        activities
    }
}
