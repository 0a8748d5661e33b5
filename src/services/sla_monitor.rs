//! SLA and escalation monitor.
//!
//! A stateless periodic sweep over started phases and over scheduled phases
//! that have not started yet. Each pending phase or activity with a deadline
//! is checked against the clock: once overdue it gets one open violation,
//! which then climbs the escalation ladder as rungs are crossed. Violations whose target is no longer pending are resolved.
//!
//! The monitor never takes the engine's workflow locks. It only writes
//! violation rows, with compare-and-swap on their version.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityInstance, AuditAction, AuditEntityType, AuditLogEntry, OutboundSignal, PhaseInstance,
    PhaseName, PhaseStatus, SlaConfiguration, SlaMonitorConfig, SlaTarget, SlaTargetKind,
    SlaViolation, SYSTEM_ACTOR_ID,
};
use crate::domain::ports::{SignalSink, SlaRepository, ViolationFilter, WorkflowRepository};
use crate::services::audit_log::AuditLogWriter;
use crate::services::template_catalog::TemplateCatalog;

/// Counters from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Targets with a deadline that were evaluated.
    pub checked: usize,
    pub violations_opened: usize,
    /// Escalation rungs crossed.
    pub escalations: usize,
    pub warnings: usize,
    pub resolved: usize,
    pub failures: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SweepReport {
    fn fail(&mut self, error: DomainError) {
        tracing::warn!(error = %error, "sla evaluation failed; will retry on next sweep");
        self.failures += 1;
        self.errors.push(error.to_string());
    }
}

/// Due time of a phase: its planned end, else actual start plus SLA hours.
/// A phase that has neither has no deadline.
pub fn phase_due(
    phase: &PhaseInstance,
    config: Option<&SlaConfiguration>,
) -> DomainResult<Option<DateTime<Utc>>> {
    if let Some(planned_end) = phase.planned_end {
        return Ok(Some(planned_end));
    }
    match (phase.actual_start, config) {
        (Some(start), Some(config)) => config.due_from(start).map(Some).ok_or_else(|| out_of_range(config)),
        _ => Ok(None),
    }
}

/// When the warning for a target with `due` fires. The warning lead time is
/// the gap between `sla_hours` and `warning_hours`.
pub fn warning_at(due: DateTime<Utc>, config: &SlaConfiguration) -> Option<DateTime<Utc>> {
    config
        .warning_hours
        .and_then(|w| config.sla_hours.checked_sub(w))
        .and_then(chrono::Duration::try_hours)
        .and_then(|lead| due.checked_sub_signed(lead))
}

fn out_of_range(config: &SlaConfiguration) -> DomainError {
    DomainError::ValidationFailed(format!(
        "SLA of {}h puts the deadline out of range",
        config.sla_hours
    ))
}

/// Periodic SLA sweep.
#[derive(Clone)]
pub struct SlaMonitor {
    catalog: Arc<TemplateCatalog>,
    workflows: Arc<dyn WorkflowRepository>,
    sla: Arc<dyn SlaRepository>,
    signals: Arc<dyn SignalSink>,
    audit: AuditLogWriter,
    config: SlaMonitorConfig,
    running: Arc<AtomicBool>,
}

impl SlaMonitor {
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        workflows: Arc<dyn WorkflowRepository>,
        sla: Arc<dyn SlaRepository>,
        signals: Arc<dyn SignalSink>,
        audit: AuditLogWriter,
        config: SlaMonitorConfig,
    ) -> Self {
        Self {
            catalog,
            workflows,
            sla,
            signals,
            audit,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run sweeps on the configured interval until `stop` is called.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = self.clone();
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = period.as_secs(), "sla monitor started");

            while monitor.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                match monitor.sweep(Utc::now()).await {
                    Ok(report) => tracing::info!(
                        checked = report.checked,
                        opened = report.violations_opened,
                        escalations = report.escalations,
                        warnings = report.warnings,
                        resolved = report.resolved,
                        failures = report.failures,
                        "sla sweep finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "sla sweep aborted"),
                }
            }

            tracing::info!("sla monitor stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Evaluate every tracked target as of `now`.
    ///
    /// Only a failure to list phases or open violations aborts
    /// the sweep; per-target failures are counted and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DomainResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut tracked: HashSet<Uuid> = HashSet::new();
        let mut unreadable: HashSet<(i64, i64, PhaseName)> = HashSet::new();

        // Unstarted phases only have a deadline once they are scheduled.
        let mut phases = self.workflows.list_phases_by_status(PhaseStatus::InProgress).await?;
        phases.extend(
            self.workflows
                .list_phases_by_status(PhaseStatus::NotStarted)
                .await?
                .into_iter()
                .filter(|p| p.planned_end.is_some()),
        );

        for phase in phases {
            tracked.insert(phase.id);
            if let Err(e) = self.sweep_phase(&phase, now, &mut tracked, &mut report).await {
                unreadable.insert((phase.cycle_id, phase.report_id, phase.phase));
                report.fail(e);
            }
        }

        let open = self
            .sla
            .list(ViolationFilter {
                open_only: true,
                ..ViolationFilter::default()
            })
            .await?;
        let stale: Vec<Uuid> = open
            .iter()
            .filter(|v| !tracked.contains(&v.entity_id))
            .filter(|v| !unreadable.contains(&(v.cycle_id, v.report_id, v.phase)))
            .map(|v| v.entity_id)
            .collect();

        if !stale.is_empty() {
            match self.sla.resolve_open(&stale, now).await {
                Ok(resolved) => {
                    for violation in &resolved {
                        self.audit
                            .record(
                                AuditLogEntry::new(
                                    AuditEntityType::SlaViolation,
                                    violation.id.to_string(),
                                    AuditAction::ViolationResolved,
                                    SYSTEM_ACTOR_ID,
                                )
                                .with_change(serde_json::json!("open"), serde_json::json!("resolved"))
                                .with_note("target no longer pending")
                                .at(now),
                            )
                            .await;
                    }
                    report.resolved += resolved.len();
                }
                Err(e) => report.fail(DomainError::SlaEvaluationFailure {
                    target: format!("{} stale violations", stale.len()),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(report)
    }

    async fn sweep_phase(
        &self,
        phase: &PhaseInstance,
        now: DateTime<Utc>,
        tracked: &mut HashSet<Uuid>,
        report: &mut SweepReport,
    ) -> DomainResult<()> {
        let phase_target = SlaTarget {
            kind: SlaTargetKind::Phase,
            entity_id: phase.id,
            cycle_id: phase.cycle_id,
            report_id: phase.report_id,
            phase: phase.phase,
            activity_name: None,
        };
        let template = self
            .catalog
            .get_phase_template(phase.phase)
            .map_err(|e| failure(&phase_target, e))?;
        let activities = self
            .workflows
            .list_phase_activities(phase.workflow(), phase.phase)
            .await
            .map_err(|e| failure(&phase_target, e))?;

        let phase_config = self.catalog.phase_sla(phase.phase);
        match phase_due(phase, phase_config) {
            Ok(Some(due)) => {
                report.checked += 1;
                if let Err(e) = self.evaluate(&phase_target, due, phase_config, now, report).await {
                    report.fail(failure(&phase_target, e));
                }
            }
            Ok(None) => {}
            Err(e) => report.fail(failure(&phase_target, e)),
        }

        let Some(anchor) = phase.actual_start else {
            return Ok(());
        };
        for activity in activities.iter().filter(|a| a.status.is_pending()) {
            let Some(activity_template) = template.activity(&activity.activity_name) else {
                continue;
            };
            let Some(config) = self.catalog.activity_sla(phase.phase, activity_template) else {
                continue;
            };
            tracked.insert(activity.id);
            report.checked += 1;

            let target = activity_target(activity);
            let Some(due) = config.due_from(anchor) else {
                report.fail(failure(&target, out_of_range(config)));
                continue;
            };
            if let Err(e) = self.evaluate(&target, due, Some(config), now, report).await {
                report.fail(failure(&target, e));
            }
        }
        Ok(())
    }

    /// Warn, open and escalate for one target.
    async fn evaluate(
        &self,
        target: &SlaTarget,
        due: DateTime<Utc>,
        config: Option<&SlaConfiguration>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> DomainResult<()> {
        if now < due {
            let warn_from = config.and_then(|c| warning_at(due, c));
            if warn_from.is_some_and(|at| now >= at) && self.sla.record_warning(target.entity_id, now).await? {
                tracing::info!(target = %target, due_at = %due, "sla warning");
                self.emit(OutboundSignal::SlaWarning {
                    target: target.clone(),
                    due_at: due,
                })
                .await;
                report.warnings += 1;
            }
            return Ok(());
        }

        let mut violation = match self.sla.find_open(target.entity_id).await? {
            Some(existing) => existing,
            None => self.open_violation(target, due, now, report).await?,
        };

        let ladder = config.map(|c| c.ordered_ladder()).unwrap_or_default();
        let previous_level = violation.escalation_level;
        let crossed = violation.advance_ladder(&ladder, now);
        if crossed.is_empty() {
            return Ok(());
        }
        self.sla.update(&violation).await?;
        violation.version += 1;

        let mut level_before = previous_level;
        for rung in crossed {
            tracing::warn!(
                target = %target,
                violation_id = %violation.id,
                level = rung.level,
                notify_role = %rung.notify_role,
                "sla escalation raised"
            );
            self.audit
                .record(
                    AuditLogEntry::new(
                        AuditEntityType::SlaViolation,
                        violation.id.to_string(),
                        AuditAction::EscalationRaised,
                        SYSTEM_ACTOR_ID,
                    )
                    .with_change(serde_json::json!(level_before), serde_json::json!(rung.level))
                    .with_note(format!("notify {}", rung.notify_role))
                    .at(now),
                )
                .await;
            self.emit(OutboundSignal::EscalationRaised {
                violation: violation.clone(),
                level: rung.level,
                notify_role: rung.notify_role,
            })
            .await;
            level_before = rung.level;
            report.escalations += 1;
        }
        Ok(())
    }

    async fn open_violation(
        &self,
        target: &SlaTarget,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> DomainResult<SlaViolation> {
        let violation = SlaViolation::open(target.clone(), due, now);
        match self.sla.create(&violation).await {
            Ok(()) => {}
            // Another sweep opened it first.
            Err(DomainError::ConcurrentModification { .. }) => {
                return self.sla.find_open(target.entity_id).await?.ok_or_else(|| {
                    DomainError::ConcurrentModification {
                        entity: "sla_violation".to_string(),
                        id: target.entity_id.to_string(),
                    }
                });
            }
            Err(e) => return Err(e),
        }

        tracing::warn!(target = %target, due_at = %due, violation_id = %violation.id, "sla violation opened");
        self.audit
            .record(
                AuditLogEntry::new(
                    AuditEntityType::SlaViolation,
                    violation.id.to_string(),
                    AuditAction::ViolationOpened,
                    SYSTEM_ACTOR_ID,
                )
                .with_new_value(serde_json::json!({
                    "target": target.to_string(),
                    "kind": target.kind.as_str(),
                    "due_at": due,
                }))
                .at(now),
            )
            .await;
        report.violations_opened += 1;
        Ok(violation)
    }

    async fn emit(&self, signal: OutboundSignal) {
        let name = signal.name();
        if let Err(e) = self.signals.emit(signal).await {
            tracing::warn!(signal = name, error = %e, "failed to emit signal");
        }
    }
}

fn activity_target(activity: &ActivityInstance) -> SlaTarget {
    SlaTarget {
        kind: SlaTargetKind::Activity,
        entity_id: activity.id,
        cycle_id: activity.cycle_id,
        report_id: activity.report_id,
        phase: activity.phase,
        activity_name: Some(activity.activity_name.clone()),
    }
}

fn failure(target: &SlaTarget, error: DomainError) -> DomainError {
    match error {
        e @ DomainError::SlaEvaluationFailure { .. } => e,
        other => DomainError::SlaEvaluationFailure {
            target: target.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Role, SlaScope, WorkflowKey};
    use chrono::TimeZone;

    fn phase_config() -> SlaConfiguration {
        SlaConfiguration::new(PhaseName::Scoping, SlaScope::Phase, 120)
            .with_warning(90)
            .with_rung(1, 0, Role::TestExecutive)
    }

    #[test]
    fn test_phase_due_prefers_planned_end() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut phase = PhaseInstance::new(WorkflowKey::new(1, 1), PhaseName::Scoping);
        assert_eq!(phase_due(&phase, Some(&phase_config())).unwrap(), None);

        phase.actual_start = Some(start);
        assert_eq!(
            phase_due(&phase, Some(&phase_config())).unwrap(),
            Some(start + chrono::Duration::hours(120))
        );

        let planned = start + chrono::Duration::hours(10);
        phase.planned_end = Some(planned);
        assert_eq!(phase_due(&phase, None).unwrap(), Some(planned));
    }

    #[test]
    fn test_out_of_range_sla_is_an_error_not_a_panic() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut phase = PhaseInstance::new(WorkflowKey::new(1, 1), PhaseName::Scoping);
        phase.actual_start = Some(start);
        let huge = SlaConfiguration::new(PhaseName::Scoping, SlaScope::Phase, i64::MAX / 2).with_warning(1);

        assert!(matches!(
            phase_due(&phase, Some(&huge)),
            Err(DomainError::ValidationFailed(_))
        ));
        assert_eq!(warning_at(start, &huge), None);
    }

    #[test]
    fn test_warning_lead_time() {
        let due = Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap();
        assert_eq!(
            warning_at(due, &phase_config()),
            Some(due - chrono::Duration::hours(30))
        );
        let no_warning = SlaConfiguration::new(PhaseName::Scoping, SlaScope::Phase, 120);
        assert_eq!(warning_at(due, &no_warning), None);
    }

    #[test]
    fn test_failure_wraps_once() {
        let target = SlaTarget {
            kind: SlaTargetKind::Phase,
            entity_id: Uuid::new_v4(),
            cycle_id: 3,
            report_id: 4,
            phase: PhaseName::Scoping,
            activity_name: None,
        };
        let wrapped = failure(&target, DomainError::DatabaseError("locked".into()));
        let twice = failure(&target, wrapped);
        match twice {
            DomainError::SlaEvaluationFailure { target, reason } => {
                assert_eq!(target, "3/4/scoping");
                assert!(reason.contains("locked"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
