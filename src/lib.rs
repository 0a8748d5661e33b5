//! cycleflow - phase and activity orchestration for regulatory test cycles
//!
//! Every (test cycle, report) pair runs through nine fixed phases. Each phase
//! holds activity instances materialized from a template catalog, gated by
//! typed dependencies and moved through a guarded state machine. Trigger
//! rules auto-skip and auto-complete activities, an SLA monitor escalates
//! missed deadlines, and every change lands in an append-only audit log.
//!
//! # Architecture
//!
//! - **Domain** (`domain`): models, errors and the ports services depend on
//! - **Services** (`services`): catalog, dependency resolution, the
//!   transition engine, triggers, SLA monitoring and queries
//! - **Adapters** (`adapters`): SQLite repositories and signal sinks
//! - **Infrastructure** (`infrastructure`): configuration and logging
//! - **CLI** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use cycleflow::services::WorkflowEngine;
//! use cycleflow::domain::models::{ActivityKey, Actor, PhaseName, Role, WorkflowKey};
//!
//! let workflow = WorkflowKey::new(21, 156);
//! engine.register_workflow(workflow, &Actor::system()).await?;
//! let key = ActivityKey::new(21, 156, PhaseName::Planning, "Start Planning Phase");
//! engine.start_activity(&key, &Actor::with_role("tester-1", Role::Tester)).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, Actor, Config, DependencyType, PhaseInstance,
    PhaseName, PhaseStatus, Role, SlaViolation, WorkflowKey,
};
pub use domain::ports::{AuditRepository, ContextProvider, SignalSink, SlaRepository, WorkflowRepository};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    DependencyResolver, SlaMonitor, TemplateCatalog, WorkflowEngine, WorkflowQueryService,
};
