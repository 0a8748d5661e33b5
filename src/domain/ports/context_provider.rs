//! Read-only view of facts owned by other parts of the application.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowKey;

/// Context consulted by skip conditions.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Whether an active data source configuration exists for the pair.
    async fn has_active_data_source(&self, workflow: WorkflowKey) -> DomainResult<bool>;
}
