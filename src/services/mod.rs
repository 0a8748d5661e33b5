//! Application services: catalog, dependency resolution, the transition
//! engine and its collaborators, SLA monitoring and queries.

pub mod audit_log;
pub mod dependency_resolver;
pub mod event_dispatcher;
pub mod phase_state;
pub mod sla_monitor;
pub mod template_catalog;
pub mod trigger_rules;
pub mod workflow_engine;
pub mod workflow_query;

pub use audit_log::AuditLogWriter;
pub use dependency_resolver::{DependencyResolver, Eligibility};
pub use event_dispatcher::{parse_events, EventDispatcher};
pub use phase_state::{ActivityChange, PhaseState};
pub use sla_monitor::{SlaMonitor, SweepReport};
pub use template_catalog::{TemplateCatalog, BUILTIN_CATALOG_VERSION};
pub use trigger_rules::{TriggerContext, TriggerRuleEngine};
pub use workflow_engine::{
    AutoAction, RegistrationReport, TransitionOutcome, TransitionReport, WorkflowEngine,
};
pub use workflow_query::{
    ActionableActivity, ActivityView, PhaseStatusView, PhaseSummary, Progress, WorkflowOverview,
    WorkflowQueryService,
};
