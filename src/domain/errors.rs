//! Domain errors for the cycleflow workflow engine.

use thiserror::Error;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Format eligibility reasons as a `; `-separated list.
fn format_reasons(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no reason given".to_string()
    } else {
        reasons.join("; ")
    }
}

/// Domain-level errors raised by the workflow engine.
///
/// Idempotent repeats of a transition are not errors: they surface as
/// `TransitionOutcome::AlreadyInState` instead.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A dependency or role precondition is unmet. Recoverable; the caller
    /// decides whether to try again later.
    #[error("Activity {activity} is not eligible: {}", format_reasons(.reasons))]
    NotEligible { activity: String, reasons: Vec<String> },

    /// A compare-and-swap write lost the race. Re-fetch and retry.
    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrentModification { entity: String, id: String },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("SLA evaluation failed for {target}: {reason}")]
    SlaEvaluationFailure { target: String, reason: String },

    #[error("Workflow not found for cycle {cycle_id} / report {report_id}")]
    WorkflowNotFound { cycle_id: i64, report_id: i64 },

    #[error("Phase instance not found: {0}")]
    PhaseNotFound(String),

    #[error("Activity instance not found: {0}")]
    ActivityNotFound(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Activity dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Whether the caller may retry the same request after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::DatabaseError(_))
    }

    pub fn not_eligible(activity: impl Into<String>, reasons: Vec<String>) -> Self {
        Self::NotEligible {
            activity: activity.into(),
            reasons,
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::InvalidTemplate(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_path_formatting() {
        let err = DomainError::DependencyCycle(vec![
            "Define Scope".to_string(),
            "Tester Review".to_string(),
            "Define Scope".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Activity dependency cycle detected: Define Scope -> Tester Review -> Define Scope"
        );
    }

    #[test]
    fn test_not_eligible_lists_reasons() {
        let err = DomainError::not_eligible(
            "Tester Review",
            vec!["waiting on Define Scope".to_string(), "phase closed".to_string()],
        );
        assert!(err.to_string().contains("waiting on Define Scope; phase closed"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(DomainError::ConcurrentModification {
            entity: "activity".to_string(),
            id: "x".to_string(),
        }
        .is_retryable());
        assert!(!DomainError::TemplateNotFound("x".to_string()).is_retryable());
    }
}
