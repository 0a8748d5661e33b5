//! Command-line interface.

pub mod app;
pub mod args;
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::domain::errors::DomainError;

pub use app::App;

#[derive(Parser, Debug)]
#[command(name = "cycleflow")]
#[command(about = "cycleflow - phase and activity orchestration for test cycles", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .cycleflow/
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the project directory, config and database
    Init(commands::init::InitArgs),

    /// Inspect, export and validate the template catalog
    Catalog(commands::catalog::CatalogArgs),

    /// Register and inspect workflows
    Workflow(commands::workflow::WorkflowArgs),

    /// Transition a single activity
    Activity(commands::activity::ActivityArgs),

    /// Record a domain event for a phase
    Signal(commands::signal::SignalArgs),

    /// Apply inbound events from a file or stdin
    Event(commands::event::EventArgs),

    /// List activities a role can act on now
    Actionable(commands::actionable::ActionableArgs),

    /// Query the audit log
    Audit(commands::audit::AuditArgs),

    /// Run SLA sweeps and list violations
    Sla(commands::sla::SlaArgs),

    /// Manage context consulted by skip conditions
    Context(commands::context::ContextArgs),
}

#[derive(Debug, serde::Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasons: Option<&'a [String]>,
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<DomainError>() {
        Some(DomainError::NotEligible { .. }) => "not_eligible",
        Some(DomainError::ConcurrentModification { .. }) => "concurrent_modification",
        Some(DomainError::TemplateNotFound(_)) => "template_not_found",
        Some(DomainError::WorkflowNotFound { .. }) => "workflow_not_found",
        Some(DomainError::PhaseNotFound(_)) => "phase_not_found",
        Some(DomainError::ActivityNotFound(_)) => "activity_not_found",
        Some(DomainError::ValidationFailed(_)) => "validation_failed",
        Some(DomainError::InvalidTemplate(_) | DomainError::DependencyCycle(_)) => "invalid_template",
        Some(_) => "domain_error",
        None => "error",
    }
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let reasons = match err.downcast_ref::<DomainError>() {
            Some(DomainError::NotEligible { reasons, .. }) => Some(reasons.as_slice()),
            _ => None,
        };
        let out = ErrorOutput {
            error: error_kind(&err),
            message: format!("{err:#}"),
            reasons,
        };
        eprintln!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "cycleflow",
            "--json",
            "activity",
            "complete",
            "21",
            "156",
            "scoping",
            "Report Owner Approval",
            "--actor",
            "ro-7",
            "--role",
            "report_owner",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Activity(_)));
    }

    #[test]
    fn test_cli_rejects_unknown_phase() {
        let result = Cli::try_parse_from(["cycleflow", "workflow", "status", "1", "2", "nowhere"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_kind_sees_through_context() {
        let err = anyhow::Error::new(DomainError::not_eligible("Complete", vec!["x".into()]))
            .context("completing activity");
        assert_eq!(error_kind(&err), "not_eligible");
    }
}
