//! In-memory presence store shared by relay instances in one process.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::domain::{PresenceError, PresenceStore, RoomId};

/// Expiring member sets keyed by room.
///
/// Expired members are invisible to readers and pruned on the next write or
/// read of the same room.
#[derive(Default)]
pub struct InMemoryPresenceStore {
    rooms: DashMap<RoomId, HashMap<String, Instant>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn add(
        &self,
        room_id: &RoomId,
        member: &str,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let now = Instant::now();
        let mut members = self.rooms.entry(room_id.clone()).or_default();
        members.retain(|_, expires_at| *expires_at > now);
        members.insert(member.to_string(), now + ttl);
        Ok(())
    }

    async fn remove(&self, room_id: &RoomId, member: &str) -> Result<(), PresenceError> {
        let now = Instant::now();
        self.rooms.remove_if_mut(room_id, |_, members| {
            members.remove(member);
            members.retain(|_, expires_at| *expires_at > now);
            members.is_empty()
        });
        Ok(())
    }

    async fn members(&self, room_id: &RoomId) -> Result<Vec<String>, PresenceError> {
        let now = Instant::now();
        let members = self
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(member, _)| member.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if members.is_empty() {
            self.rooms
                .remove_if(room_id, |_, members| members.values().all(|e| *e <= now));
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_add_is_set_semantics() {
        // given:
        let store = InMemoryPresenceStore::new();
        let r1 = room("r1");

        // when:
        store.add(&r1, "alice@i1", Duration::from_secs(60)).await.unwrap();
        store.add(&r1, "alice@i1", Duration::from_secs(60)).await.unwrap();

        // then:
        assert_eq!(store.members(&r1).await.unwrap(), vec!["alice@i1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_absent_member_is_noop() {
        let store = InMemoryPresenceStore::new();
        let r1 = room("r1");

        store.remove(&r1, "ghost@i1").await.unwrap();

        assert!(store.members(&r1).await.unwrap().is_empty());
        assert_eq!(store.room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_unless_refreshed() {
        // Test: an entry that is not re-added within its TTL disappears
        // given:
        let store = InMemoryPresenceStore::new();
        let r1 = room("r1");
        let ttl = Duration::from_secs(60);
        store.add(&r1, "alice@crashed", ttl).await.unwrap();
        store.add(&r1, "bob@alive", ttl).await.unwrap();

        // when:
        tokio::time::advance(Duration::from_secs(40)).await;
        store.add(&r1, "bob@alive", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        // then:
        assert_eq!(store.members(&r1).await.unwrap(), vec!["bob@alive".to_string()]);

        // when:
        tokio::time::advance(Duration::from_secs(60)).await;

        // then:
        assert!(store.members(&r1).await.unwrap().is_empty());
        assert_eq!(store.room_count(), 0);
    }
}
