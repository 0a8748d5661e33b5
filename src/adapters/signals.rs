//! Outbound signal sinks.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::OutboundSignal;
use crate::domain::ports::SignalSink;

/// Writes each signal to the log as a structured event.
#[derive(Debug, Clone, Default)]
pub struct TracingSignalSink;

#[async_trait]
impl SignalSink for TracingSignalSink {
    async fn emit(&self, signal: OutboundSignal) -> DomainResult<()> {
        let payload = serde_json::to_string(&signal)?;
        tracing::info!(target: "cycleflow::signals", signal = signal.name(), %payload, "outbound signal");
        Ok(())
    }
}

/// Forwards signals into a bounded channel for an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelSignalSink {
    sender: mpsc::Sender<OutboundSignal>,
}

impl ChannelSignalSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundSignal>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl SignalSink for ChannelSignalSink {
    async fn emit(&self, signal: OutboundSignal) -> DomainResult<()> {
        self.sender
            .send(signal)
            .await
            .map_err(|e| DomainError::ValidationFailed(format!("signal consumer is gone: {}", e.0.name())))
    }
}

/// Keeps every emitted signal in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySignalSink {
    signals: Mutex<Vec<OutboundSignal>>,
}

impl MemorySignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<OutboundSignal> {
        self.signals.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.signals().iter().filter(|s| s.name() == name).count()
    }
}

#[async_trait]
impl SignalSink for MemorySignalSink {
    async fn emit(&self, signal: OutboundSignal) -> DomainResult<()> {
        match self.signals.lock() {
            Ok(mut signals) => signals.push(signal),
            Err(poisoned) => poisoned.into_inner().push(signal),
        }
        Ok(())
    }
}
