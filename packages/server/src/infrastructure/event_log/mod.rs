//! Durable event log adapters and the relay built on them.
//!
//! - `inmemory`: ordered topics with per-group committed offsets
//! - `producer`: fan-out transport appending client events to a topic
//! - `consumer`: per-instance group member re-broadcasting every event

pub mod consumer;
pub mod inmemory;
pub mod producer;

pub use consumer::EventLogConsumer;
pub use inmemory::InMemoryEventLog;
pub use producer::EventLogProducer;
