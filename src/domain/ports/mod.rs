//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - WorkflowRepository: phase and activity instance store
//! - AuditRepository: append-only audit log
//! - SlaRepository: SLA violations and warning markers
//! - ContextProvider: facts used by skip conditions
//! - SignalSink: outbound notifications

pub mod audit_repository;
pub mod context_provider;
pub mod signal_sink;
pub mod sla_repository;
pub mod workflow_repository;

pub use audit_repository::AuditRepository;
pub use context_provider::ContextProvider;
pub use signal_sink::SignalSink;
pub use sla_repository::{SlaRepository, ViolationFilter};
pub use workflow_repository::{ActivityFilter, ChangeSet, WorkflowRepository};
