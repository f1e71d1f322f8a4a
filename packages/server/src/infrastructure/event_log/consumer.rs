//! Event log consumer.
//!
//! Each instance consumes the topic in its own group, so every instance
//! sees every event and re-broadcasts it to its local connections of the
//! event's room. Malformed records are logged, committed and skipped.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{
    domain::{EditorEvent, EventLog, EventLogError, LogRecord},
    infrastructure::connection_registry::ConnectionRegistry,
};

const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct EventLogConsumer {
    log: Arc<dyn EventLog>,
    topic: String,
    group: String,
    registry: Arc<ConnectionRegistry>,
    batch_size: usize,
    poll_timeout: Duration,
    next_offset: u64,
}

impl EventLogConsumer {
    pub fn new(
        log: Arc<dyn EventLog>,
        topic: impl Into<String>,
        group: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            group: group.into(),
            registry,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            next_offset: 0,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Join the group and spawn the consume loop.
    ///
    /// A group that never committed starts at the current end of the topic,
    /// so a fresh instance does not replay history to its clients.
    pub async fn start(mut self) -> Result<JoinHandle<()>, EventLogError> {
        self.position().await?;
        tracing::info!(
            topic = %self.topic,
            group = %self.group,
            offset = self.next_offset,
            "Event log consumer started"
        );
        Ok(tokio::spawn(self.run()))
    }

    async fn position(&mut self) -> Result<(), EventLogError> {
        self.next_offset = match self.log.committed(&self.topic, &self.group).await? {
            Some(offset) => offset,
            None => {
                let end = self.log.end_offset(&self.topic).await?;
                self.log.commit(&self.topic, &self.group, end).await?;
                end
            }
        };
        Ok(())
    }

    async fn run(mut self) {
        loop {
            match self.poll_once().await {
                Ok(0) => {
                    self.log
                        .wait_for(&self.topic, self.next_offset, self.poll_timeout)
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        topic = %self.topic,
                        group = %self.group,
                        "Event log poll failed: {}",
                        e
                    );
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Handle one batch and commit past it.
    ///
    /// Returns the number of records read.
    pub async fn poll_once(&mut self) -> Result<usize, EventLogError> {
        let records = self
            .log
            .poll(&self.topic, &self.group, self.batch_size)
            .await?;
        let Some(last) = records.last() else {
            return Ok(0);
        };
        let next_offset = last.offset + 1;

        for record in &records {
            self.handle(record);
        }

        self.log
            .commit(&self.topic, &self.group, next_offset)
            .await?;
        self.next_offset = next_offset;
        Ok(records.len())
    }

    fn handle(&self, record: &LogRecord) -> usize {
        match EditorEvent::decode(&record.payload) {
            Ok(event) => self.registry.broadcast_local(&event.room_id, &event.raw, None),
            Err(e) => {
                tracing::warn!(
                    topic = %self.topic,
                    offset = record.offset,
                    "Skipping malformed event: {}",
                    e
                );
                0
            }
        }
    }
}
