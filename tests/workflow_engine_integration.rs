//! Integration tests for the workflow engine.
//!
//! These run the engine against a migrated in-memory SQLite database and
//! cover registration, the dependency-gated state machine, trigger rules,
//! revisions, approvals and concurrent transitions.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{harness, key, report_owner, tester};
use cycleflow::domain::errors::DomainError;
use cycleflow::domain::models::{
    ActivityStatus, Actor, AuditAction, AuditEntityType, PhaseName, PhaseStatus, Role, WorkflowKey,
};
use cycleflow::services::TransitionOutcome;

const SCOPING_CHAIN: [&str; 3] = ["Start", "Define Scope", "Tester Review"];

#[tokio::test]
async fn test_registration_creates_every_phase_once() {
    let h = harness().await;
    let workflow = WorkflowKey::new(7, 70);

    let first = h.engine.register_workflow(workflow, &Actor::system()).await.unwrap();
    assert!(first.created);
    assert_eq!(first.phases, 9);
    assert_eq!(first.activities, 49);

    let again = h.engine.register_workflow(workflow, &Actor::system()).await.unwrap();
    assert!(!again.created);
    assert_eq!(h.workflows.list_phases(workflow).await.unwrap().len(), 9);

    // Only entry activities are open for work on a fresh workflow.
    let start = h.activity(workflow, PhaseName::Scoping, "Start").await;
    assert!(start.can_start);
    let define = h.activity(workflow, PhaseName::Scoping, "Define Scope").await;
    assert!(!define.can_start);
    assert_eq!(define.status, ActivityStatus::NotStarted);
}

#[tokio::test]
async fn test_scoping_chain_runs_to_phase_completion() {
    let h = harness().await;
    let workflow = WorkflowKey::new(21, 156);
    h.register(workflow).await;

    for name in SCOPING_CHAIN {
        h.finish(workflow, PhaseName::Scoping, name, &tester()).await;
    }
    let phase = h.phase(workflow, PhaseName::Scoping).await;
    assert_eq!(phase.status, PhaseStatus::InProgress);
    assert!(phase.actual_start.is_some());

    let approval = key(workflow, PhaseName::Scoping, "Report Owner Approval");
    h.engine.start_activity(&approval, &report_owner()).await.unwrap();
    h.engine.complete_activity(&approval, &report_owner()).await.unwrap();

    let complete = key(workflow, PhaseName::Scoping, "Complete");
    h.engine.start_activity(&complete, &tester()).await.unwrap();
    let report = h.engine.complete_activity(&complete, &tester()).await.unwrap();

    assert!(report.phase_completed);
    assert_eq!(report.phase_status, PhaseStatus::Complete);
    let phase = h.phase(workflow, PhaseName::Scoping).await;
    assert_eq!(phase.status, PhaseStatus::Complete);
    assert!(phase.actual_end.is_some());
    assert_eq!(h.signals.count("phase.completed"), 1);
}

#[tokio::test]
async fn test_start_before_prerequisites_is_rejected_with_reasons() {
    let h = harness().await;
    let workflow = WorkflowKey::new(1, 2);
    h.register(workflow).await;

    let err = h
        .engine
        .start_activity(&key(workflow, PhaseName::Scoping, "Tester Review"), &tester())
        .await
        .unwrap_err();
    match err {
        DomainError::NotEligible { reasons, .. } => {
            assert!(reasons.iter().any(|r| r.contains("Define Scope")));
        }
        other => panic!("expected NotEligible, got {other:?}"),
    }
    assert_eq!(
        h.status(workflow, PhaseName::Scoping, "Tester Review").await,
        ActivityStatus::NotStarted
    );
}

#[tokio::test]
async fn test_approval_requires_the_named_role() {
    let h = harness().await;
    let workflow = WorkflowKey::new(3, 4);
    h.register(workflow).await;
    for name in SCOPING_CHAIN {
        h.finish(workflow, PhaseName::Scoping, name, &tester()).await;
    }

    let approval = key(workflow, PhaseName::Scoping, "Report Owner Approval");
    h.engine.start_activity(&approval, &tester()).await.unwrap();
    let err = h.engine.complete_activity(&approval, &tester()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotEligible { .. }));
    assert!(err.to_string().contains("report_owner"));
    assert_eq!(
        h.status(workflow, PhaseName::Scoping, "Report Owner Approval").await,
        ActivityStatus::InProgress
    );

    h.engine.complete_activity(&approval, &report_owner()).await.unwrap();
    assert_eq!(
        h.status(workflow, PhaseName::Scoping, "Report Owner Approval").await,
        ActivityStatus::Completed
    );
    assert!(h.activity(workflow, PhaseName::Scoping, "Complete").await.can_start);
}

#[tokio::test]
async fn test_repeated_complete_is_idempotent() {
    let h = harness().await;
    let workflow = WorkflowKey::new(5, 6);
    h.register(workflow).await;
    let start = key(workflow, PhaseName::Planning, "Start Planning Phase");

    h.engine.start_activity(&start, &tester()).await.unwrap();
    let first = h.engine.complete_activity(&start, &tester()).await.unwrap();
    assert_eq!(first.outcome, TransitionOutcome::Applied);

    let second = h.engine.complete_activity(&start, &tester()).await.unwrap();
    assert_eq!(second.outcome, TransitionOutcome::AlreadyInState(ActivityStatus::Completed));
    assert!(second.changes.is_empty());

    let instance = h.activity(workflow, PhaseName::Planning, "Start Planning Phase").await;
    let trail = h
        .query
        .get_audit_trail(AuditEntityType::Activity, &instance.id.to_string())
        .await
        .unwrap();
    let completions = trail
        .iter()
        .filter(|e| e.action == AuditAction::ActivityCompleted)
        .count();
    assert_eq!(completions, 1);
    assert_eq!(trail.first().map(|e| e.action), Some(AuditAction::ActivityStarted));
}

#[tokio::test]
async fn test_active_data_source_skips_upload_at_registration() {
    let h = harness().await;
    let with_source = WorkflowKey::new(21, 156);
    let without_source = WorkflowKey::new(21, 157);
    h.context.set_data_source(with_source, "core_banking", true).await.unwrap();

    let report = h.engine.register_workflow(with_source, &Actor::system()).await.unwrap();
    assert!(report
        .auto_actions
        .iter()
        .any(|a| a.activity == "Upload Data Files" && a.status == ActivityStatus::Skipped));
    h.register(without_source).await;

    assert_eq!(
        h.status(with_source, PhaseName::DataProfiling, "Upload Data Files").await,
        ActivityStatus::Skipped
    );
    assert_eq!(
        h.status(without_source, PhaseName::DataProfiling, "Upload Data Files").await,
        ActivityStatus::NotStarted
    );

    // The skipped step no longer holds up rule generation.
    h.finish(with_source, PhaseName::DataProfiling, "Start Data Profiling", &tester()).await;
    assert!(h.activity(with_source, PhaseName::DataProfiling, "Generate Profiling Rules").await.can_start);
}

#[tokio::test]
async fn test_required_activity_cannot_be_skipped_manually() {
    let h = harness().await;
    let workflow = WorkflowKey::new(8, 9);
    h.register(workflow).await;

    let err = h
        .engine
        .skip_activity(&key(workflow, PhaseName::Scoping, "Define Scope"), &tester(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotEligible { .. }));
}

#[tokio::test]
async fn test_skipping_both_submissions_skips_their_review() {
    let h = harness().await;
    let workflow = WorkflowKey::new(10, 11);
    let phase = PhaseName::RequestForInformation;
    h.register(workflow).await;
    h.finish(workflow, phase, "Start Request Info Phase", &tester()).await;
    h.finish(workflow, phase, "Send Information Requests", &tester()).await;

    let owner = Actor::with_role("data-owner-1", Role::DataOwner);
    h.engine
        .skip_activity(&key(workflow, phase, "Document Submission"), &owner, Some("no documents"))
        .await
        .unwrap();
    assert_eq!(h.status(workflow, phase, "Review Submissions").await, ActivityStatus::NotStarted);

    let report = h
        .engine
        .skip_activity(&key(workflow, phase, "Data Source Submission"), &owner, None)
        .await
        .unwrap();
    assert!(report
        .changes
        .iter()
        .any(|c| c.activity == "Review Submissions" && c.automatic && c.to == ActivityStatus::Skipped));
    assert!(h.activity(workflow, phase, "Complete Request Info").await.can_start);
}

#[tokio::test]
async fn test_domain_event_auto_completes_waiting_activity() {
    let h = harness().await;
    let workflow = WorkflowKey::new(12, 13);
    let phase = PhaseName::TestExecution;
    h.register(workflow).await;
    h.finish(workflow, phase, "Start Test Execution", &tester()).await;

    let report = h
        .engine
        .record_domain_event(workflow, phase, "tests.executed", &Actor::system())
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Applied);
    assert_eq!(h.status(workflow, phase, "Execute Tests").await, ActivityStatus::Completed);
    assert!(h.activity(workflow, phase, "Review Test Results").await.can_start);

    let repeat = h
        .engine
        .record_domain_event(workflow, phase, "tests.executed", &Actor::system())
        .await
        .unwrap();
    assert_eq!(repeat.outcome, TransitionOutcome::NoChange);
}

#[tokio::test]
async fn test_domain_event_completes_activity_already_in_progress() {
    let h = harness().await;
    let workflow = WorkflowKey::new(12, 14);
    let phase = PhaseName::TestExecution;
    h.register(workflow).await;
    h.finish(workflow, phase, "Start Test Execution", &tester()).await;

    let execute = key(workflow, phase, "Execute Tests");
    h.engine.start_activity(&execute, &tester()).await.unwrap();
    assert_eq!(h.status(workflow, phase, "Execute Tests").await, ActivityStatus::InProgress);

    let report = h
        .engine
        .record_domain_event(workflow, phase, "tests.executed", &Actor::system())
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Applied);
    assert!(report
        .changes
        .iter()
        .any(|c| c.activity == "Execute Tests" && c.automatic && c.to == ActivityStatus::Completed));
    let executed = h.activity(workflow, phase, "Execute Tests").await;
    assert_eq!(executed.status, ActivityStatus::Completed);
    assert_eq!(executed.started_by.as_deref(), Some("tester-1"));
    assert!(h.activity(workflow, phase, "Review Test Results").await.can_start);

    // Rework needs a fresh event; the earlier one does not close it again.
    h.engine
        .request_revision(&execute, &tester(), "rerun against the corrected sample")
        .await
        .unwrap();
    assert!(!h.phase(workflow, phase).await.has_received("tests.executed"));
    h.engine.start_activity(&execute, &tester()).await.unwrap();
    assert_eq!(h.status(workflow, phase, "Execute Tests").await, ActivityStatus::InProgress);

    h.engine
        .record_domain_event(workflow, phase, "tests.executed", &Actor::system())
        .await
        .unwrap();
    assert_eq!(h.status(workflow, phase, "Execute Tests").await, ActivityStatus::Completed);
}

#[tokio::test]
async fn test_early_domain_event_fires_once_activity_is_eligible() {
    let h = harness().await;
    let workflow = WorkflowKey::new(14, 15);
    let phase = PhaseName::FinalizeReport;
    h.register(workflow).await;

    h.engine
        .record_domain_event(workflow, phase, "report.generated", &Actor::system())
        .await
        .unwrap();
    assert_eq!(h.status(workflow, phase, "Generate Report").await, ActivityStatus::NotStarted);
    assert!(h.phase(workflow, phase).await.has_received("report.generated"));

    h.finish(workflow, phase, "Start Finalize Report", &tester()).await;
    assert_eq!(h.status(workflow, phase, "Generate Report").await, ActivityStatus::Completed);
}

#[tokio::test]
async fn test_revision_reopens_phase_and_stales_downstream() {
    let h = harness().await;
    let workflow = WorkflowKey::new(16, 17);
    let phase = PhaseName::Scoping;
    h.register(workflow).await;
    for name in SCOPING_CHAIN {
        h.finish(workflow, phase, name, &tester()).await;
    }
    h.finish(workflow, phase, "Report Owner Approval", &report_owner()).await;
    h.finish(workflow, phase, "Complete", &tester()).await;
    assert_eq!(h.phase(workflow, phase).await.status, PhaseStatus::Complete);

    let define = key(workflow, phase, "Define Scope");
    let err = h.engine.request_revision(&define, &report_owner(), "  ").await.unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(_)));

    let report = h
        .engine
        .request_revision(&define, &report_owner(), "scope misses two attributes")
        .await
        .unwrap();
    assert!(report.phase_reopened);
    assert_eq!(report.phase_status, PhaseStatus::InProgress);

    let revised = h.activity(workflow, phase, "Define Scope").await;
    assert_eq!(revised.status, ActivityStatus::RevisionRequested);
    assert_eq!(revised.revision_reason.as_deref(), Some("scope misses two attributes"));
    // Downstream work keeps its status but no longer counts as satisfied.
    let review = h.activity(workflow, phase, "Tester Review").await;
    assert_eq!(review.status, ActivityStatus::Completed);
    assert!(!h.activity(workflow, phase, "Report Owner Approval").await.can_start);

    h.finish(workflow, phase, "Define Scope", &tester()).await;
    let phase_row = h.phase(workflow, phase).await;
    assert_eq!(phase_row.status, PhaseStatus::Complete);
    assert_eq!(h.signals.count("phase.completed"), 2);
}

#[tokio::test]
async fn test_block_and_resume() {
    let h = harness().await;
    let workflow = WorkflowKey::new(18, 19);
    let start = key(workflow, PhaseName::Planning, "Start Planning Phase");
    h.register(workflow).await;
    h.engine.start_activity(&start, &tester()).await.unwrap();

    h.engine.block_activity(&start, &tester(), "waiting on data").await.unwrap();
    let blocked = h.activity(workflow, PhaseName::Planning, "Start Planning Phase").await;
    assert_eq!(blocked.status, ActivityStatus::Blocked);
    assert_eq!(blocked.blocked_reason.as_deref(), Some("waiting on data"));

    let err = h.engine.complete_activity(&start, &tester()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotEligible { .. }));

    h.engine.start_activity(&start, &tester()).await.unwrap();
    let resumed = h.activity(workflow, PhaseName::Planning, "Start Planning Phase").await;
    assert_eq!(resumed.status, ActivityStatus::InProgress);
    assert!(resumed.blocked_reason.is_none());
}

#[tokio::test]
async fn test_unknown_workflow_and_activity() {
    let h = harness().await;
    let missing = WorkflowKey::new(99, 99);
    let err = h
        .engine
        .start_activity(&key(missing, PhaseName::Scoping, "Start"), &tester())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::WorkflowNotFound { .. }));

    let workflow = WorkflowKey::new(20, 21);
    h.register(workflow).await;
    let err = h
        .engine
        .start_activity(&key(workflow, PhaseName::Scoping, "Nope"), &tester())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ActivityNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_starts_apply_once() {
    let h = harness().await;
    let workflow = WorkflowKey::new(22, 23);
    h.register(workflow).await;
    let start = key(workflow, PhaseName::Scoping, "Start");

    let first = tester();
    let second = Actor::with_role("tester-2", Role::Tester);
    let (a, b) = futures::join!(
        h.engine.start_activity(&start, &first),
        h.engine.start_activity(&start, &second),
    );
    let outcomes = [a.unwrap().outcome, b.unwrap().outcome];
    assert_eq!(outcomes.iter().filter(|o| **o == TransitionOutcome::Applied).count(), 1);
    assert!(outcomes.contains(&TransitionOutcome::AlreadyInState(ActivityStatus::InProgress)));

    let instance = h.activity(workflow, PhaseName::Scoping, "Start").await;
    let starts = h
        .query
        .get_audit_trail(AuditEntityType::Activity, &instance.id.to_string())
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::ActivityStarted)
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn test_actionable_activities_follow_role() {
    let h = harness().await;
    let workflow = WorkflowKey::new(24, 25);
    h.register(workflow).await;

    let tester_work = h
        .query
        .list_actionable_activities(Role::Tester, Some(24), Some(25))
        .await
        .unwrap();
    assert_eq!(tester_work.len(), 9);
    assert!(tester_work.iter().all(|a| a.action == "start"));

    let owner_work = h
        .query
        .list_actionable_activities(Role::ReportOwner, Some(24), None)
        .await
        .unwrap();
    assert!(owner_work.is_empty());

    for name in SCOPING_CHAIN {
        h.finish(workflow, PhaseName::Scoping, name, &tester()).await;
    }
    let owner_work = h
        .query
        .list_actionable_activities(Role::ReportOwner, None, None)
        .await
        .unwrap();
    assert_eq!(owner_work.len(), 1);
    assert_eq!(owner_work[0].activity.activity_name, "Report Owner Approval");

    let admin_work = h.query.list_actionable_activities(Role::Admin, None, None).await.unwrap();
    assert!(admin_work.len() > owner_work.len());
}

#[tokio::test]
async fn test_phase_schedule_rejects_inverted_dates() {
    let h = harness().await;
    let workflow = WorkflowKey::new(26, 27);
    h.register(workflow).await;
    let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let end = start - Duration::days(1);

    let err = h
        .engine
        .set_phase_schedule(workflow, PhaseName::Planning, Some(start), Some(end), &tester())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationFailed(_)));

    let end = start + Duration::days(5);
    let report = h
        .engine
        .set_phase_schedule(workflow, PhaseName::Planning, Some(start), Some(end), &tester())
        .await
        .unwrap();
    assert_eq!(report.outcome, TransitionOutcome::Applied);
    assert_eq!(h.phase(workflow, PhaseName::Planning).await.planned_end, Some(end));
}

#[tokio::test]
async fn test_phase_status_and_overview_report_progress() {
    let h = harness().await;
    let workflow = WorkflowKey::new(12, 120);
    h.register(workflow).await;
    h.finish(workflow, PhaseName::Scoping, "Start", &tester()).await;
    h.finish(workflow, PhaseName::Scoping, "Define Scope", &tester()).await;

    let status = h.query.get_phase_status(workflow, PhaseName::Scoping).await.unwrap();
    assert_eq!(status.phase.status, PhaseStatus::InProgress);
    let names: Vec<&str> = status
        .activities
        .iter()
        .map(|a| a.instance.activity_name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["Start", "Define Scope", "Tester Review", "Report Owner Approval", "Complete"]
    );
    assert_eq!(status.progress.total, 5);
    assert_eq!(status.progress.completed, 2);
    assert_eq!(status.progress.not_started, 3);
    assert!(status.activities[2].blocking_reasons.is_empty());
    assert!(status.activities[3]
        .blocking_reasons
        .iter()
        .any(|r| r.contains("Tester Review")));
    assert!(status.open_violations.is_empty());

    let overview = h.query.get_workflow_overview(workflow).await.unwrap();
    assert_eq!(overview.phases.len(), 9);
    assert_eq!(overview.phases[0].phase, PhaseName::Planning);
    let scoping = overview
        .phases
        .iter()
        .find(|p| p.phase == PhaseName::Scoping)
        .unwrap();
    assert_eq!(scoping.status, PhaseStatus::InProgress);
    assert_eq!(scoping.progress.done(), 2);
    assert_eq!(overview.open_violations, 0);

    let missing = WorkflowKey::new(404, 404);
    assert!(matches!(
        h.query.get_workflow_overview(missing).await,
        Err(DomainError::WorkflowNotFound { .. })
    ));
    assert!(matches!(
        h.query.get_phase_status(missing, PhaseName::Scoping).await,
        Err(DomainError::WorkflowNotFound { .. })
    ));
}
