//! Outbound signal port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::OutboundSignal;

/// Delivers signals to external collaborators (notification service,
/// cycle orchestrator).
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn emit(&self, signal: OutboundSignal) -> DomainResult<()>;
}
