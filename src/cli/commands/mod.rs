//! CLI command implementations.

pub mod actionable;
pub mod activity;
pub mod audit;
pub mod catalog;
pub mod context;
pub mod event;
pub mod init;
pub mod signal;
pub mod sla;
pub mod workflow;
