//! Fan-out through the durable event log.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusMessage, EventLog, FanoutError, FanoutTransport};

/// Appends client events to a topic every instance consumes.
///
/// The origin instance consumes its own appends as well, so this transport
/// loops back and callers must not deliver locally themselves.
pub struct EventLogProducer {
    log: Arc<dyn EventLog>,
    topic: String,
}

impl EventLogProducer {
    pub fn new(log: Arc<dyn EventLog>, topic: impl Into<String>) -> Self {
        Self {
            log,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl FanoutTransport for EventLogProducer {
    async fn publish(&self, message: BusMessage) -> Result<(), FanoutError> {
        let offset = self.log.append(&self.topic, message.content).await?;
        tracing::trace!(topic = %self.topic, offset, room_id = %message.room_id, "Appended event");
        Ok(())
    }

    fn loops_back(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "event_log"
    }
}
