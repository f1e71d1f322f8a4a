//! Fan-out transport port.
//!
//! Both delivery paths, the broadcast bus and the durable event log, sit
//! behind this trait. Room handlers choose one per message class.

use async_trait::async_trait;

use super::{entity::BusMessage, error::FanoutError};

#[async_trait]
pub trait FanoutTransport: Send + Sync {
    /// Hand a message to the cross-instance transport.
    async fn publish(&self, message: BusMessage) -> Result<(), FanoutError>;

    /// Whether the transport delivers back to this instance's own
    /// connections. When it does not, the caller delivers locally itself.
    fn loops_back(&self) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
