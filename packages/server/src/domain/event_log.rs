//! Durable event log port.
//!
//! An ordered, append-only log per topic. Consumers in a group resume from
//! the group's committed offset, which gives at-least-once delivery.

use std::time::Duration;

use async_trait::async_trait;

use super::error::EventLogError;

/// One record read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub offset: u64,
    pub payload: String,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record and return its offset.
    async fn append(&self, topic: &str, payload: String) -> Result<u64, EventLogError>;

    /// Read up to `max_records` records after the group's committed offset.
    ///
    /// Reading does not advance the committed offset.
    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max_records: usize,
    ) -> Result<Vec<LogRecord>, EventLogError>;

    /// Commit `next_offset` as the next record the group will read.
    async fn commit(&self, topic: &str, group: &str, next_offset: u64)
    -> Result<(), EventLogError>;

    /// Offset the next appended record will get.
    async fn end_offset(&self, topic: &str) -> Result<u64, EventLogError>;

    /// The group's committed offset, if it ever committed one.
    async fn committed(&self, topic: &str, group: &str) -> Result<Option<u64>, EventLogError>;

    /// Wait until the topic holds a record at or after `offset`, or until
    /// `timeout` elapses.
    async fn wait_for(&self, topic: &str, offset: u64, timeout: Duration);
}
