//! Domain models: templates, instances, SLA tracking, audit and events.

pub mod activity;
pub mod audit;
pub mod config;
pub mod event;
pub mod phase;
pub mod sla;
pub mod template;

pub use activity::{ActivityInstance, ActivityKey, ActivityStatus, Actor, SYSTEM_ACTOR_ID};
pub use audit::{AuditAction, AuditEntityType, AuditFilter, AuditLogEntry};
pub use config::{
    AuditConfig, CatalogConfig, Config, DatabaseConfig, LoggingConfig, SlaMonitorConfig,
};
pub use event::{ActivityEvent, DomainSignalEvent, InboundEvent, OutboundSignal};
pub use phase::{PhaseInstance, PhaseStatus, WorkflowKey, RECEIVED_EVENTS_KEY};
pub use sla::{
    EscalationRung, MAX_SLA_HOURS, SlaConfiguration, SlaScope, SlaTarget, SlaTargetKind, SlaViolation,
    ViolationStatus,
};
pub use template::{
    ActivityTemplate, ActivityType, DependencyEdge, DependencyType, PhaseName, PhaseTemplate,
    Role, SkipCondition,
};
