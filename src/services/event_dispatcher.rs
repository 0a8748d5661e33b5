//! Routes inbound events to the workflow engine.

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Actor, InboundEvent};
use crate::services::workflow_engine::{TransitionReport, WorkflowEngine};

/// Dispatches `InboundEvent`s to engine operations.
#[derive(Clone)]
pub struct EventDispatcher {
    engine: Arc<WorkflowEngine>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn dispatch(&self, event: InboundEvent) -> DomainResult<TransitionReport> {
        tracing::debug!(event = event.name(), "dispatching inbound event");
        match event {
            InboundEvent::Start(e) => self.engine.start_activity(&e.key(), &e.actor()).await,
            InboundEvent::Complete(e) => self.engine.complete_activity(&e.key(), &e.actor()).await,
            InboundEvent::RequestRevision(e) => {
                let reason = e.reason.clone().unwrap_or_default();
                self.engine.request_revision(&e.key(), &e.actor(), &reason).await
            }
            InboundEvent::Skip(e) => {
                self.engine
                    .skip_activity(&e.key(), &e.actor(), e.reason.as_deref())
                    .await
            }
            InboundEvent::Block(e) => {
                let reason = e.reason.clone().unwrap_or_default();
                self.engine.block_activity(&e.key(), &e.actor(), &reason).await
            }
            InboundEvent::DomainSignal(e) => {
                let actor = Actor::new(e.actor_id.clone(), None);
                self.engine
                    .record_domain_event(e.workflow(), e.phase, &e.signal, &actor)
                    .await
            }
        }
    }
}

/// Parse events from a JSON object, a JSON array, or newline-delimited JSON.
/// Blank lines are ignored. Line numbers in errors are 1-based.
pub fn parse_events(input: &str) -> DomainResult<Vec<InboundEvent>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    if let Ok(single) = serde_json::from_str::<InboundEvent>(trimmed) {
        return Ok(vec![single]);
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line.trim())
                .map_err(|e| DomainError::SerializationError(format!("line {}: {e}", i + 1)))
        })
        .collect()
}
