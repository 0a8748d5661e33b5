//! Wires configuration, storage and services for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::signals::TracingSignalSink;
use crate::adapters::sqlite::{
    initialize_database, SqliteAuditRepository, SqliteContextProvider, SqliteSlaRepository,
    SqliteWorkflowRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{AuditRepository, SignalSink, SlaRepository, WorkflowRepository};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{
    AuditLogWriter, EventDispatcher, SlaMonitor, TemplateCatalog, WorkflowEngine, WorkflowQueryService,
};

/// Everything a command needs, built from one `Config`.
pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub catalog: Arc<TemplateCatalog>,
    pub engine: Arc<WorkflowEngine>,
    pub query: WorkflowQueryService,
    pub monitor: SlaMonitor,
    pub context: SqliteContextProvider,
}

impl App {
    /// Load configuration (from `config_path` when given) and open the app.
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::open(Self::load_config(config_path)?).await
    }

    pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Ok(config)
    }

    pub async fn open(config: Config) -> Result<Self> {
        let catalog = Arc::new(
            TemplateCatalog::load(config.catalog.path.as_deref()).context("Failed to load template catalog")?,
        );

        let pool = initialize_database(&config.database)
            .await
            .context("Failed to initialize database. Run 'cycleflow init' first.")?;

        let workflows: Arc<dyn WorkflowRepository> = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
        let sla: Arc<dyn SlaRepository> = Arc::new(SqliteSlaRepository::new(pool.clone()));
        let audit_repo: Arc<dyn AuditRepository> = Arc::new(SqliteAuditRepository::new(pool.clone()));
        let signals: Arc<dyn SignalSink> = Arc::new(TracingSignalSink);
        let context = SqliteContextProvider::new(pool.clone());
        let audit = AuditLogWriter::new(audit_repo, config.audit.clone());

        let engine = Arc::new(WorkflowEngine::new(
            catalog.clone(),
            workflows.clone(),
            sla.clone(),
            Arc::new(context.clone()),
            signals.clone(),
            audit.clone(),
        ));
        let query = WorkflowQueryService::new(catalog.clone(), workflows.clone(), sla.clone(), audit.clone());
        let monitor = SlaMonitor::new(
            catalog.clone(),
            workflows,
            sla,
            signals,
            audit,
            config.sla_monitor.clone(),
        );

        Ok(Self {
            config,
            pool,
            catalog,
            engine,
            query,
            monitor,
            context,
        })
    }

    pub fn dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.engine.clone())
    }
}
