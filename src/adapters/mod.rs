//! Adapters implementing the domain ports.

pub mod signals;
pub mod sqlite;

pub use signals::{ChannelSignalSink, MemorySignalSink, TracingSignalSink};
