//! Domain layer for the cycleflow workflow engine
//!
//! Core business types and the port traits adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
