//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber with an optional
//! rolling JSON file.

pub mod logger;

pub use logger::{LogFormat, LoggerImpl, RotationPolicy};
