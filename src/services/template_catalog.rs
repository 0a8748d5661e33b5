//! Template catalog.
//!
//! Immutable, versioned phase and activity definitions plus SLA policy.
//! Loaded once at startup, either from the built-in regulatory catalog or
//! from a YAML document, and validated before use. Workflow instances keep
//! referring to the catalog by phase and activity name; changing it means
//! deploying a new version.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityTemplate, ActivityType, DependencyEdge, DependencyType, PhaseName, PhaseTemplate,
    Role, SkipCondition, SlaConfiguration, SlaScope, MAX_SLA_HOURS,
};
use crate::services::dependency_resolver::DependencyResolver;

/// Version string of the built-in catalog.
pub const BUILTIN_CATALOG_VERSION: &str = "builtin-2024.1";

/// Serialized form of a catalog, as read from and written to YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    pub phases: Vec<PhaseTemplate>,
    #[serde(default)]
    pub sla: Vec<SlaConfiguration>,
}

/// Validated, read-only template catalog.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    version: String,
    phases: BTreeMap<PhaseName, PhaseTemplate>,
    sla: Vec<SlaConfiguration>,
}

impl TemplateCatalog {
    /// The built-in nine-phase catalog.
    pub fn builtin() -> DomainResult<Self> {
        Self::from_document(builtin_document())
    }

    pub fn from_yaml_str(yaml: &str) -> DomainResult<Self> {
        let document: CatalogDocument = serde_yaml::from_str(yaml)?;
        Self::from_document(document)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            DomainError::InvalidTemplate(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Load from `path` when given, the built-in catalog otherwise.
    pub fn load(path: Option<&str>) -> DomainResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    /// Validate a document and build the catalog from it.
    pub fn from_document(document: CatalogDocument) -> DomainResult<Self> {
        validate_document(&document)?;
        let phases = document
            .phases
            .into_iter()
            .map(|p| (p.name, p))
            .collect();
        Ok(Self {
            version: document.version,
            phases,
            sla: document.sla,
        })
    }

    pub fn to_document(&self) -> CatalogDocument {
        CatalogDocument {
            version: self.version.clone(),
            phases: self.phases.values().cloned().collect(),
            sla: self.sla.clone(),
        }
    }

    pub fn to_yaml(&self) -> DomainResult<String> {
        serde_yaml::to_string(&self.to_document()).map_err(|e| DomainError::SerializationError(e.to_string()))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Phase templates in phase order.
    pub fn phases(&self) -> impl Iterator<Item = &PhaseTemplate> {
        self.phases.values()
    }

    pub fn get_phase_template(&self, phase: PhaseName) -> DomainResult<&PhaseTemplate> {
        self.phases
            .get(&phase)
            .ok_or_else(|| DomainError::TemplateNotFound(phase.as_str().to_string()))
    }

    /// Activity templates of a phase, in order.
    pub fn get_activity_templates(&self, phase: PhaseName) -> DomainResult<Vec<&ActivityTemplate>> {
        Ok(self.get_phase_template(phase)?.ordered_activities())
    }

    pub fn get_activity_template(&self, phase: PhaseName, activity: &str) -> DomainResult<&ActivityTemplate> {
        self.get_phase_template(phase)?
            .activity(activity)
            .ok_or_else(|| DomainError::TemplateNotFound(format!("{}/{activity}", phase.as_str())))
    }

    /// Incoming edges of an activity.
    pub fn get_dependency_edges(&self, phase: PhaseName, activity: &str) -> DomainResult<Vec<&DependencyEdge>> {
        let template = self.get_phase_template(phase)?;
        if template.activity(activity).is_none() {
            return Err(DomainError::TemplateNotFound(format!("{}/{activity}", phase.as_str())));
        }
        Ok(template.edges_for(activity).collect())
    }

    /// Activities in a phase that auto-complete on `event`.
    pub fn activities_completed_by(&self, phase: PhaseName, event: &str) -> DomainResult<Vec<&ActivityTemplate>> {
        Ok(self
            .get_activity_templates(phase)?
            .into_iter()
            .filter(|a| a.auto_complete_on_event.as_deref() == Some(event))
            .collect())
    }

    pub fn sla_configurations(&self) -> &[SlaConfiguration] {
        &self.sla
    }

    /// Most specific SLA for an activity: named beats activity type.
    pub fn activity_sla(&self, phase: PhaseName, activity: &ActivityTemplate) -> Option<&SlaConfiguration> {
        self.sla
            .iter()
            .filter(|c| c.phase == phase && c.applies_to_activity(&activity.name, activity.activity_type))
            .max_by_key(|c| c.specificity())
    }

    pub fn phase_sla(&self, phase: PhaseName) -> Option<&SlaConfiguration> {
        self.sla
            .iter()
            .find(|c| c.phase == phase && c.scope == SlaScope::Phase)
    }
}

/// Check a catalog document for structural errors.
pub fn validate_document(document: &CatalogDocument) -> DomainResult<()> {
    if document.version.trim().is_empty() {
        return Err(DomainError::InvalidTemplate("catalog version is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for phase in &document.phases {
        if !seen.insert(phase.name) {
            return Err(DomainError::InvalidTemplate(format!(
                "phase {} defined twice",
                phase.name.as_str()
            )));
        }
        validate_phase(phase)?;
    }

    let mut orders: Vec<u32> = document.phases.iter().map(|p| p.order).collect();
    orders.sort_unstable();
    let expected: Vec<u32> = (1..=PhaseName::ALL.len() as u32).collect();
    if orders != expected {
        return Err(DomainError::InvalidTemplate(format!(
            "phase order must be 1..{} without gaps, got {orders:?}",
            PhaseName::ALL.len()
        )));
    }

    for config in &document.sla {
        validate_sla(document, config)?;
    }

    Ok(())
}

/// Check one phase template: unique names and orders, edges within the
/// phase, approval edges aimed at approval activities, and no cycles.
pub fn validate_phase(phase: &PhaseTemplate) -> DomainResult<()> {
    let label = phase.name.as_str();

    if phase.order != phase.name.order() {
        return Err(DomainError::InvalidTemplate(format!(
            "phase {label} must have order {}, got {}",
            phase.name.order(),
            phase.order
        )));
    }
    if phase.activities.is_empty() {
        return Err(DomainError::InvalidTemplate(format!("phase {label} has no activities")));
    }

    let mut names = HashSet::new();
    let mut orders = HashSet::new();
    for activity in &phase.activities {
        if activity.name.trim().is_empty() {
            return Err(DomainError::InvalidTemplate(format!("phase {label} has an unnamed activity")));
        }
        if !names.insert(activity.name.as_str()) {
            return Err(DomainError::InvalidTemplate(format!(
                "activity '{}' defined twice in phase {label}",
                activity.name
            )));
        }
        if !orders.insert(activity.order) {
            return Err(DomainError::InvalidTemplate(format!(
                "order {} used twice in phase {label}",
                activity.order
            )));
        }
    }

    for edge in &phase.edges {
        if edge.activity == edge.depends_on {
            return Err(DomainError::InvalidTemplate(format!(
                "activity '{}' depends on itself",
                edge.activity
            )));
        }
        for end in [&edge.activity, &edge.depends_on] {
            if !names.contains(end.as_str()) {
                return Err(DomainError::InvalidTemplate(format!(
                    "edge references '{end}', which is not an activity of phase {label}"
                )));
            }
        }
        if edge.dependency_type == DependencyType::Approval {
            let target = phase.activity(&edge.depends_on);
            if target.map(|a| a.activity_type) != Some(ActivityType::Approval) {
                return Err(DomainError::InvalidTemplate(format!(
                    "approval edge from '{}' must point at an APPROVAL activity, '{}' is not one",
                    edge.activity, edge.depends_on
                )));
            }
        }
        if edge.group.is_some() && edge.dependency_type != DependencyType::Any {
            return Err(DomainError::InvalidTemplate(format!(
                "only 'any' edges may carry a group ('{}' -> '{}')",
                edge.activity, edge.depends_on
            )));
        }
    }

    if let Some(cycle) = DependencyResolver::new().detect_cycle(phase) {
        return Err(DomainError::DependencyCycle(cycle));
    }

    Ok(())
}

fn validate_sla(document: &CatalogDocument, config: &SlaConfiguration) -> DomainResult<()> {
    let label = config.phase.as_str();
    if config.sla_hours <= 0 || config.sla_hours > MAX_SLA_HOURS {
        return Err(DomainError::InvalidTemplate(format!(
            "SLA for {label} must be between 1 and {MAX_SLA_HOURS}h, got {}h",
            config.sla_hours
        )));
    }
    if let Some(warning) = config.warning_hours {
        if warning <= 0 || warning >= config.sla_hours {
            return Err(DomainError::InvalidTemplate(format!(
                "SLA warning for {label} must be between 0 and {}h, got {warning}h",
                config.sla_hours
            )));
        }
    }
    if let SlaScope::Activity { name } = &config.scope {
        let known = document
            .phases
            .iter()
            .find(|p| p.name == config.phase)
            .and_then(|p| p.activity(name))
            .is_some();
        if !known {
            return Err(DomainError::InvalidTemplate(format!(
                "SLA references unknown activity '{name}' in {label}"
            )));
        }
    }

    let mut levels = HashSet::new();
    for rung in &config.escalation {
        if rung.level == 0 || !levels.insert(rung.level) {
            return Err(DomainError::InvalidTemplate(format!(
                "escalation levels for {label} must be unique and start at 1"
            )));
        }
        if rung.hours_after_breach < 0 {
            return Err(DomainError::InvalidTemplate(format!(
                "escalation level {} for {label} fires before the breach",
                rung.level
            )));
        }
        if rung.hours_after_breach > MAX_SLA_HOURS {
            return Err(DomainError::InvalidTemplate(format!(
                "escalation level {} for {label} exceeds {MAX_SLA_HOURS}h after the breach",
                rung.level
            )));
        }
    }
    let ladder = config.ordered_ladder();
    if ladder.windows(2).any(|w| w[0].level > w[1].level) {
        return Err(DomainError::InvalidTemplate(format!(
            "escalation levels for {label} must rise with hours after breach"
        )));
    }

    Ok(())
}

// -- Built-in catalog --

fn chain(names: &[&str]) -> Vec<DependencyEdge> {
    names
        .windows(2)
        .map(|w| DependencyEdge::completion(w[1], w[0]))
        .collect()
}

fn phase(name: PhaseName, activities: Vec<ActivityTemplate>, edges: Vec<DependencyEdge>) -> PhaseTemplate {
    PhaseTemplate {
        name,
        order: name.order(),
        activities,
        edges,
    }
}

fn planning() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    let mut edges = chain(&[
        "Start Planning Phase",
        "Load Attributes",
        "Review Attributes",
        "Report Owner Approval",
    ]);
    edges.push(DependencyEdge::approval("Complete Planning Phase", "Report Owner Approval"));
    phase(
        PhaseName::Planning,
        vec![
            ActivityTemplate::new("Start Planning Phase", Start, 1, Role::Tester),
            ActivityTemplate::new("Load Attributes", Task, 2, Role::Tester)
                .with_description("Create or import the report attribute list"),
            ActivityTemplate::new("Review Attributes", Review, 3, Role::Tester),
            ActivityTemplate::new("Report Owner Approval", Approval, 4, Role::ReportOwner),
            ActivityTemplate::new("Complete Planning Phase", Complete, 5, Role::Tester),
        ],
        edges,
    )
}

fn data_profiling() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    let mut edges = chain(&[
        "Start Data Profiling",
        "Upload Data Files",
        "Generate Profiling Rules",
        "Review Profiling Rules",
        "Report Owner Rule Approval",
    ]);
    edges.push(DependencyEdge::approval("Execute Profiling", "Report Owner Rule Approval"));
    edges.push(DependencyEdge::completion("Complete Data Profiling", "Execute Profiling"));
    phase(
        PhaseName::DataProfiling,
        vec![
            ActivityTemplate::new("Start Data Profiling", Start, 1, Role::Tester),
            ActivityTemplate::new("Upload Data Files", Task, 2, Role::Tester)
                .skip_when(SkipCondition::HasActiveDataSource)
                .with_description("Not needed when a data source is already configured"),
            ActivityTemplate::new("Generate Profiling Rules", Task, 3, Role::Tester)
                .auto_complete_on("profiling.rules_generated"),
            ActivityTemplate::new("Review Profiling Rules", Review, 4, Role::Tester),
            ActivityTemplate::new("Report Owner Rule Approval", Approval, 5, Role::ReportOwner),
            ActivityTemplate::new("Execute Profiling", Task, 6, Role::Tester)
                .auto_complete_on("profiling.executed"),
            ActivityTemplate::new("Complete Data Profiling", Complete, 7, Role::Tester),
        ],
        edges,
    )
}

fn scoping() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    phase(
        PhaseName::Scoping,
        vec![
            ActivityTemplate::new("Start", Start, 1, Role::Tester),
            ActivityTemplate::new("Define Scope", Task, 2, Role::Tester),
            ActivityTemplate::new("Tester Review", Review, 3, Role::Tester),
            ActivityTemplate::new("Report Owner Approval", Approval, 4, Role::ReportOwner),
            ActivityTemplate::new("Complete", Complete, 5, Role::Tester),
        ],
        chain(&["Start", "Define Scope", "Tester Review", "Report Owner Approval", "Complete"]),
    )
}

fn sample_selection() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    phase(
        PhaseName::SampleSelection,
        vec![
            ActivityTemplate::new("Start Sample Selection", Start, 1, Role::Tester),
            ActivityTemplate::new("Generate Samples", Task, 2, Role::Tester)
                .optional()
                .auto_complete_on("samples.generated"),
            ActivityTemplate::new("Upload Samples", Task, 3, Role::Tester).optional(),
            ActivityTemplate::new("Review Samples", Review, 4, Role::Tester),
            ActivityTemplate::new("Report Owner Sample Approval", Approval, 5, Role::ReportOwner),
            ActivityTemplate::new("Complete Sample Selection", Complete, 6, Role::Tester),
        ],
        vec![
            DependencyEdge::completion("Generate Samples", "Start Sample Selection"),
            DependencyEdge::completion("Upload Samples", "Start Sample Selection"),
            DependencyEdge::any_of("Review Samples", "Generate Samples", "sample_source"),
            DependencyEdge::any_of("Review Samples", "Upload Samples", "sample_source"),
            DependencyEdge::completion("Report Owner Sample Approval", "Review Samples"),
            DependencyEdge::approval("Complete Sample Selection", "Report Owner Sample Approval"),
        ],
    )
}

fn data_provider_identification() -> PhaseTemplate {
    use ActivityType::{Complete, Start, Task};
    phase(
        PhaseName::DataProviderIdentification,
        vec![
            ActivityTemplate::new("Start Data Provider ID", Start, 1, Role::Tester),
            ActivityTemplate::new("LOB Executive Assignment", Task, 2, Role::Tester),
            ActivityTemplate::new("Data Owner Assignment", Task, 3, Role::DataExecutive),
            ActivityTemplate::new("Complete Data Provider ID", Complete, 4, Role::Tester),
        ],
        chain(&[
            "Start Data Provider ID",
            "LOB Executive Assignment",
            "Data Owner Assignment",
            "Complete Data Provider ID",
        ]),
    )
}

fn request_for_information() -> PhaseTemplate {
    use ActivityType::{Complete, Review, Start, Task};
    phase(
        PhaseName::RequestForInformation,
        vec![
            ActivityTemplate::new("Start Request Info Phase", Start, 1, Role::Tester),
            ActivityTemplate::new("Send Information Requests", Task, 2, Role::Tester),
            ActivityTemplate::new("Document Submission", Task, 3, Role::DataOwner).optional(),
            ActivityTemplate::new("Data Source Submission", Task, 4, Role::DataOwner)
                .optional()
                .skip_when(SkipCondition::PhaseDataFlag {
                    key: "documents_only".to_string(),
                }),
            ActivityTemplate::new("Review Submissions", Review, 5, Role::Tester)
                .skip_when(SkipCondition::AllPrerequisitesSkipped),
            ActivityTemplate::new("Complete Request Info", Complete, 6, Role::Tester),
        ],
        vec![
            DependencyEdge::completion("Send Information Requests", "Start Request Info Phase"),
            DependencyEdge::completion("Document Submission", "Send Information Requests"),
            DependencyEdge::completion("Data Source Submission", "Send Information Requests"),
            DependencyEdge::any_of("Review Submissions", "Document Submission", "evidence"),
            DependencyEdge::any_of("Review Submissions", "Data Source Submission", "evidence"),
            DependencyEdge::completion("Complete Request Info", "Review Submissions"),
        ],
    )
}

fn test_execution() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    let mut edges = chain(&[
        "Start Test Execution",
        "Execute Tests",
        "Review Test Results",
        "Test Executive Sign-off",
    ]);
    edges.push(DependencyEdge::approval("Complete Test Execution", "Test Executive Sign-off"));
    phase(
        PhaseName::TestExecution,
        vec![
            ActivityTemplate::new("Start Test Execution", Start, 1, Role::Tester),
            ActivityTemplate::new("Execute Tests", Task, 2, Role::Tester).auto_complete_on("tests.executed"),
            ActivityTemplate::new("Review Test Results", Review, 3, Role::Tester),
            ActivityTemplate::new("Test Executive Sign-off", Approval, 4, Role::TestExecutive),
            ActivityTemplate::new("Complete Test Execution", Complete, 5, Role::Tester),
        ],
        edges,
    )
}

fn observation_management() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    let mut edges = chain(&[
        "Start Observation Management",
        "Create Observations",
        "Report Owner Observation Review",
        "Observation Approval",
    ]);
    edges.push(DependencyEdge::approval("Complete Observations", "Observation Approval"));
    phase(
        PhaseName::ObservationManagement,
        vec![
            ActivityTemplate::new("Start Observation Management", Start, 1, Role::Tester),
            ActivityTemplate::new("Create Observations", Task, 2, Role::Tester),
            ActivityTemplate::new("Report Owner Observation Review", Review, 3, Role::ReportOwner).optional(),
            ActivityTemplate::new("Observation Approval", Approval, 4, Role::TestExecutive),
            ActivityTemplate::new("Complete Observations", Complete, 5, Role::Tester),
        ],
        edges,
    )
}

fn finalize_report() -> PhaseTemplate {
    use ActivityType::{Approval, Complete, Review, Start, Task};
    phase(
        PhaseName::FinalizeReport,
        vec![
            ActivityTemplate::new("Start Finalize Report", Start, 1, Role::Tester),
            ActivityTemplate::new("Generate Report", Task, 2, Role::Tester).auto_complete_on("report.generated"),
            ActivityTemplate::new("Review Report", Review, 3, Role::Tester),
            ActivityTemplate::new("Test Executive Approval", Approval, 4, Role::TestExecutive),
            ActivityTemplate::new("Report Owner Executive Sign-off", Approval, 5, Role::ReportOwnerExecutive),
            ActivityTemplate::new("Complete Finalize Report", Complete, 6, Role::Tester),
        ],
        vec![
            DependencyEdge::completion("Generate Report", "Start Finalize Report"),
            DependencyEdge::completion("Review Report", "Generate Report"),
            DependencyEdge::completion("Test Executive Approval", "Review Report"),
            DependencyEdge::approval("Report Owner Executive Sign-off", "Test Executive Approval"),
            DependencyEdge::approval("Complete Finalize Report", "Test Executive Approval"),
            DependencyEdge::approval("Complete Finalize Report", "Report Owner Executive Sign-off"),
        ],
    )
}

fn builtin_sla() -> Vec<SlaConfiguration> {
    let phase_hours = [
        (PhaseName::Planning, 120),
        (PhaseName::DataProfiling, 168),
        (PhaseName::Scoping, 120),
        (PhaseName::SampleSelection, 120),
        (PhaseName::DataProviderIdentification, 72),
        (PhaseName::RequestForInformation, 240),
        (PhaseName::TestExecution, 240),
        (PhaseName::ObservationManagement, 168),
        (PhaseName::FinalizeReport, 120),
    ];

    let mut sla: Vec<SlaConfiguration> = phase_hours
        .into_iter()
        .map(|(phase, hours)| {
            SlaConfiguration::new(phase, SlaScope::Phase, hours)
                .with_warning(hours * 3 / 4)
                .with_rung(1, 0, Role::TestExecutive)
                .with_rung(2, 48, Role::Admin)
        })
        .collect();

    sla.push(
        SlaConfiguration::new(
            PhaseName::DataProviderIdentification,
            SlaScope::Activity {
                name: "Data Owner Assignment".to_string(),
            },
            24,
        )
        .with_warning(20)
        .with_rung(1, 0, Role::DataExecutive)
        .with_rung(2, 24, Role::TestExecutive),
    );

    for phase in [PhaseName::Planning, PhaseName::Scoping, PhaseName::FinalizeReport] {
        sla.push(
            SlaConfiguration::new(
                phase,
                SlaScope::ActivityType {
                    activity_type: ActivityType::Approval,
                },
                48,
            )
            .with_rung(1, 0, Role::ReportOwnerExecutive),
        );
    }

    sla
}

fn builtin_document() -> CatalogDocument {
    CatalogDocument {
        version: BUILTIN_CATALOG_VERSION.to_string(),
        phases: vec![
            planning(),
            data_profiling(),
            scoping(),
            sample_selection(),
            data_provider_identification(),
            request_for_information(),
            test_execution(),
            observation_management(),
            finalize_report(),
        ],
        sla: builtin_sla(),
    }
}
