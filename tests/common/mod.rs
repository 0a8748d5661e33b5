//! Shared fixtures for integration tests.
//!
//! Every harness runs against a fresh migrated in-memory SQLite pool with
//! the built-in catalog and an in-memory signal sink.

#![allow(dead_code)]

use std::sync::Arc;

use cycleflow::adapters::signals::MemorySignalSink;
use cycleflow::adapters::sqlite::{
    create_migrated_test_pool, SqliteAuditRepository, SqliteContextProvider, SqliteSlaRepository,
    SqliteWorkflowRepository,
};
use cycleflow::domain::models::{
    ActivityInstance, ActivityKey, ActivityStatus, Actor, PhaseInstance, PhaseName, Role,
    SlaMonitorConfig, WorkflowKey,
};
use cycleflow::domain::ports::{AuditRepository, SlaRepository, WorkflowRepository};
use cycleflow::services::{
    AuditLogWriter, SlaMonitor, TemplateCatalog, WorkflowEngine, WorkflowQueryService,
};

pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub query: WorkflowQueryService,
    pub monitor: SlaMonitor,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub sla: Arc<dyn SlaRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub context: SqliteContextProvider,
    pub signals: Arc<MemorySignalSink>,
}

pub async fn harness() -> Harness {
    let pool = create_migrated_test_pool().await.expect("test pool");
    let catalog = Arc::new(TemplateCatalog::builtin().expect("builtin catalog"));
    let workflows: Arc<dyn WorkflowRepository> = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
    let sla: Arc<dyn SlaRepository> = Arc::new(SqliteSlaRepository::new(pool.clone()));
    let audit: Arc<dyn AuditRepository> = Arc::new(SqliteAuditRepository::new(pool.clone()));
    let context = SqliteContextProvider::new(pool);
    let signals = Arc::new(MemorySignalSink::new());
    let writer = AuditLogWriter::with_defaults(audit.clone());

    let engine = Arc::new(WorkflowEngine::new(
        catalog.clone(),
        workflows.clone(),
        sla.clone(),
        Arc::new(context.clone()),
        signals.clone(),
        writer.clone(),
    ));
    let query = WorkflowQueryService::new(catalog.clone(), workflows.clone(), sla.clone(), writer.clone());
    let monitor = SlaMonitor::new(
        catalog,
        workflows.clone(),
        sla.clone(),
        signals.clone(),
        writer,
        SlaMonitorConfig::default(),
    );

    Harness {
        engine,
        query,
        monitor,
        workflows,
        sla,
        audit,
        context,
        signals,
    }
}

pub fn tester() -> Actor {
    Actor::with_role("tester-1", Role::Tester)
}

pub fn report_owner() -> Actor {
    Actor::with_role("owner-1", Role::ReportOwner)
}

pub fn key(workflow: WorkflowKey, phase: PhaseName, activity: &str) -> ActivityKey {
    ActivityKey::new(workflow.cycle_id, workflow.report_id, phase, activity)
}

impl Harness {
    pub async fn register(&self, workflow: WorkflowKey) {
        self.engine
            .register_workflow(workflow, &Actor::system())
            .await
            .expect("register workflow");
    }

    /// Start and complete one activity.
    pub async fn finish(&self, workflow: WorkflowKey, phase: PhaseName, activity: &str, actor: &Actor) {
        let key = key(workflow, phase, activity);
        self.engine.start_activity(&key, actor).await.expect("start");
        self.engine.complete_activity(&key, actor).await.expect("complete");
    }

    pub async fn activity(&self, workflow: WorkflowKey, phase: PhaseName, activity: &str) -> ActivityInstance {
        self.workflows
            .get_activity(&key(workflow, phase, activity))
            .await
            .expect("read activity")
            .expect("activity exists")
    }

    pub async fn status(&self, workflow: WorkflowKey, phase: PhaseName, activity: &str) -> ActivityStatus {
        self.activity(workflow, phase, activity).await.status
    }

    pub async fn phase(&self, workflow: WorkflowKey, phase: PhaseName) -> PhaseInstance {
        self.workflows
            .get_phase(workflow, phase)
            .await
            .expect("read phase")
            .expect("phase exists")
    }
}
