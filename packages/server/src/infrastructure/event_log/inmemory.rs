//! In-memory event log.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::domain::{EventLog, EventLogError, LogRecord};

struct TopicLog {
    records: RwLock<Vec<String>>,
    /// Offset the next record will get.
    end: watch::Sender<u64>,
}

impl TopicLog {
    fn new() -> Self {
        let (end, _) = watch::channel(0);
        Self {
            records: RwLock::new(Vec::new()),
            end,
        }
    }
}

/// Append-only topics kept in process memory.
///
/// Records are never truncated. Committed offsets are kept per
/// (topic, group), and a group that never committed reads from the start.
#[derive(Default)]
pub struct InMemoryEventLog {
    topics: DashMap<String, Arc<TopicLog>>,
    offsets: DashMap<(String, String), u64>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> Arc<TopicLog> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new()))
            .clone()
    }

    fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
        self.offsets
            .get(&(topic.to_string(), group.to_string()))
            .map(|offset| *offset)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, topic: &str, payload: String) -> Result<u64, EventLogError> {
        let log = self.topic(topic);
        let mut records = log.records.write().await;
        let offset = records.len() as u64;
        records.push(payload);
        log.end.send_replace(offset + 1);
        Ok(offset)
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max_records: usize,
    ) -> Result<Vec<LogRecord>, EventLogError> {
        let start = self.committed_offset(topic, group).unwrap_or(0);
        let log = self.topic(topic);
        let records = log.records.read().await;

        Ok(records
            .iter()
            .enumerate()
            .skip(start as usize)
            .take(max_records)
            .map(|(offset, payload)| LogRecord {
                offset: offset as u64,
                payload: payload.clone(),
            })
            .collect())
    }

    async fn commit(
        &self,
        topic: &str,
        group: &str,
        next_offset: u64,
    ) -> Result<(), EventLogError> {
        let end = *self.topic(topic).end.borrow();
        if next_offset > end {
            return Err(EventLogError::OffsetOutOfRange {
                topic: topic.to_string(),
                offset: next_offset,
            });
        }
        self.offsets
            .insert((topic.to_string(), group.to_string()), next_offset);
        Ok(())
    }

    async fn end_offset(&self, topic: &str) -> Result<u64, EventLogError> {
        Ok(*self.topic(topic).end.borrow())
    }

    async fn committed(&self, topic: &str, group: &str) -> Result<Option<u64>, EventLogError> {
        Ok(self.committed_offset(topic, group))
    }

    async fn wait_for(&self, topic: &str, offset: u64, timeout: Duration) {
        let mut end = self.topic(topic).end.subscribe();
        let reached = async move {
            loop {
                let current = *end.borrow_and_update();
                if current > offset || end.changed().await.is_err() {
                    break;
                }
            }
        };
        // a timeout just means nothing new arrived
        let _ = tokio::time::timeout(timeout, reached).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "editor-events";

    #[tokio::test]
    async fn test_poll_resumes_from_committed_offset() {
        // Test: records are redelivered until committed, then the group moves on
        // given:
        let log = InMemoryEventLog::new();
        for payload in ["a", "b", "c"] {
            log.append(TOPIC, payload.to_string()).await.unwrap();
        }

        // when:
        let first = log.poll(TOPIC, "g1", 2).await.unwrap();
        let again = log.poll(TOPIC, "g1", 2).await.unwrap();
        log.commit(TOPIC, "g1", 2).await.unwrap();
        let rest = log.poll(TOPIC, "g1", 10).await.unwrap();

        // then:
        assert_eq!(first, again);
        assert_eq!(
            first.iter().map(|r| r.payload.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(rest, vec![LogRecord { offset: 2, payload: "c".to_string() }]);
    }

    #[tokio::test]
    async fn test_groups_consume_independently() {
        // Test: every group sees every record
        let log = InMemoryEventLog::new();
        log.append(TOPIC, "x".to_string()).await.unwrap();
        log.commit(TOPIC, "relay-a", 1).await.unwrap();

        assert!(log.poll(TOPIC, "relay-a", 10).await.unwrap().is_empty());
        assert_eq!(log.poll(TOPIC, "relay-b", 10).await.unwrap().len(), 1);
        assert_eq!(log.committed(TOPIC, "relay-a").await.unwrap(), Some(1));
        assert_eq!(log.committed(TOPIC, "relay-b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_past_end_is_rejected() {
        let log = InMemoryEventLog::new();

        let result = log.commit(TOPIC, "g1", 1).await;

        assert!(matches!(
            result,
            Err(EventLogError::OffsetOutOfRange { offset: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_append() {
        // given:
        let log = Arc::new(InMemoryEventLog::new());
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move {
                log.wait_for(TOPIC, 0, Duration::from_secs(5)).await;
            })
        };

        // when:
        log.append(TOPIC, "x".to_string()).await.unwrap();

        // then:
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.end_offset(TOPIC).await.unwrap(), 1);
    }
}
