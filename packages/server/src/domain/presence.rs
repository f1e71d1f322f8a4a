//! Presence tracking.
//!
//! The member set of a room lives in a store shared by every instance.
//! Each instance writes its own entries (`<user>@<instance>`), so one
//! instance removing a user never erases the same user connected through
//! another instance. Entries expire after a TTL unless refreshed, which
//! reclaims the entries of an instance that died without cleaning up.
//!
//! Every endpoint of an instance writes the same entry for a user, so the
//! tracker counts the user's local connections across all of them and only
//! touches the store on the first arrival and the last departure.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{
    entity::PresenceSnapshot,
    error::PresenceError,
    value_object::{InstanceId, RoomId, UserId},
};

/// Separator between user and instance in a stored presence entry.
const ENTRY_SEPARATOR: char = '@';

/// Shared, externally stored presence sets.
///
/// Set semantics: adding an existing member only refreshes its expiry and
/// removing an absent member is a no-op.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn add(&self, room_id: &RoomId, member: &str, ttl: Duration)
    -> Result<(), PresenceError>;

    async fn remove(&self, room_id: &RoomId, member: &str) -> Result<(), PresenceError>;

    /// Members whose entries have not expired.
    async fn members(&self, room_id: &RoomId) -> Result<Vec<String>, PresenceError>;
}

/// Presence operations of one relay instance.
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    instance_id: InstanceId,
    ttl: Duration,
    /// Open local connections per (room, user), across every endpoint.
    holders: DashMap<(RoomId, UserId), usize>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, instance_id: InstanceId, ttl: Duration) -> Self {
        Self {
            store,
            instance_id,
            ttl,
            holders: DashMap::new(),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark `user_id` present in the room through this instance.
    pub async fn add(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), PresenceError> {
        self.store
            .add(room_id, &self.entry(user_id), self.ttl)
            .await
    }

    /// Remove this instance's entry for `user_id`.
    pub async fn remove(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), PresenceError> {
        self.store.remove(room_id, &self.entry(user_id)).await
    }

    /// Distinct users present in the room through any instance.
    pub async fn members(&self, room_id: &RoomId) -> Result<BTreeSet<UserId>, PresenceError> {
        let entries = self.store.members(room_id).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| parse_entry(&entry))
            .collect())
    }

    pub async fn snapshot(&self, room_id: &RoomId) -> Result<PresenceSnapshot, PresenceError> {
        let users = self.members(room_id).await?;
        Ok(PresenceSnapshot {
            room_id: room_id.clone(),
            users: users.into_iter().collect(),
        })
    }

    /// Count one more local connection of `user_id` in the room.
    ///
    /// The store entry is written only when this is the user's first local
    /// connection. Returns whether it was.
    pub async fn join(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, PresenceError> {
        let first = {
            let mut holders = self
                .holders
                .entry((room_id.clone(), user_id.clone()))
                .or_insert(0);
            *holders += 1;
            *holders == 1
        };
        if first {
            self.add(room_id, user_id).await?;
        }
        Ok(first)
    }

    /// Count one local connection of `user_id` in the room as gone.
    ///
    /// The store entry is removed only when the user's last local connection
    /// left. Returns whether it did.
    pub async fn leave(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool, PresenceError> {
        let key = (room_id.clone(), user_id.clone());
        let last = match self.holders.entry(key) {
            Entry::Occupied(mut occupied) => {
                *occupied.get_mut() -= 1;
                if *occupied.get() == 0 {
                    occupied.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };
        if !last {
            return Ok(false);
        }

        self.remove(room_id, user_id).await?;
        // a new connection may have joined while the removal was in flight
        if self.holds(room_id, user_id) {
            self.add(room_id, user_id).await?;
        }
        Ok(true)
    }

    /// Whether `user_id` has an open connection in the room on this instance.
    pub fn holds(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.holders
            .contains_key(&(room_id.clone(), user_id.clone()))
    }

    /// Re-add the entries of every user still connected here.
    ///
    /// Returns the number of entries refreshed; failures are logged and
    /// skipped so one bad room does not stop the heartbeat.
    pub async fn refresh_local(&self) -> usize {
        let held: Vec<(RoomId, UserId)> = self
            .holders
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut refreshed = 0;
        for (room_id, user_id) in held {
            match self.add(&room_id, &user_id).await {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(
                        room_id = %room_id,
                        user_id = %user_id,
                        "Failed to refresh presence entry: {}",
                        e
                    );
                }
            }
        }
        refreshed
    }

    fn entry(&self, user_id: &UserId) -> String {
        format!("{}{}{}", user_id, ENTRY_SEPARATOR, self.instance_id)
    }
}

/// Recover the user id from a stored entry. Entries written without an
/// instance suffix are taken as bare user ids.
fn parse_entry(entry: &str) -> Option<UserId> {
    let user = entry
        .rsplit_once(ENTRY_SEPARATOR)
        .map(|(user, _instance)| user)
        .unwrap_or(entry);
    UserId::new(user.to_string()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::presence::InMemoryPresenceStore;

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    fn create_tracker(
        store: Arc<InMemoryPresenceStore>,
        instance: &str,
    ) -> PresenceTracker {
        PresenceTracker::new(
            store,
            InstanceId::new(instance.to_string()).unwrap(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_join_join_leave_sequence() {
        // Test: A joins, B joins, A leaves -> {} -> {A} -> {A,B} -> {B}
        // given:
        let tracker = create_tracker(Arc::new(InMemoryPresenceStore::new()), "i1");
        let r1 = room("r1");
        assert!(tracker.members(&r1).await.unwrap().is_empty());

        // when / then:
        tracker.add(&r1, &user("A")).await.unwrap();
        assert_eq!(
            tracker.members(&r1).await.unwrap(),
            BTreeSet::from([user("A")])
        );

        tracker.add(&r1, &user("B")).await.unwrap();
        assert_eq!(
            tracker.members(&r1).await.unwrap(),
            BTreeSet::from([user("A"), user("B")])
        );

        tracker.remove(&r1, &user("A")).await.unwrap();
        assert_eq!(
            tracker.members(&r1).await.unwrap(),
            BTreeSet::from([user("B")])
        );
    }

    #[tokio::test]
    async fn test_add_and_remove_are_idempotent() {
        // Test: repeating add or remove leaves the same presence set as doing it once
        // given:
        let tracker = create_tracker(Arc::new(InMemoryPresenceStore::new()), "i1");
        let r1 = room("r1");

        // when:
        tracker.add(&r1, &user("A")).await.unwrap();
        tracker.add(&r1, &user("A")).await.unwrap();
        let after_adds = tracker.members(&r1).await.unwrap();
        tracker.remove(&r1, &user("A")).await.unwrap();
        let after_one_remove = tracker.members(&r1).await.unwrap();
        tracker.remove(&r1, &user("A")).await.unwrap();
        let after_two_removes = tracker.members(&r1).await.unwrap();

        // then:
        assert_eq!(after_adds, BTreeSet::from([user("A")]));
        assert!(after_one_remove.is_empty());
        assert_eq!(after_one_remove, after_two_removes);
    }

    #[tokio::test]
    async fn test_removal_on_one_instance_keeps_other_instance_entry() {
        // Test: the same user connected through two instances stays present until both leave
        // given:
        let store = Arc::new(InMemoryPresenceStore::new());
        let first = create_tracker(store.clone(), "i1");
        let second = create_tracker(store, "i2");
        let r1 = room("r1");
        first.add(&r1, &user("A")).await.unwrap();
        second.add(&r1, &user("A")).await.unwrap();

        // when:
        first.remove(&r1, &user("A")).await.unwrap();

        // then:
        assert_eq!(
            second.members(&r1).await.unwrap(),
            BTreeSet::from([user("A")])
        );
        second.remove(&r1, &user("A")).await.unwrap();
        assert!(first.members(&r1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted_and_distinct() {
        // Test: snapshot lists each user once, sorted
        // given:
        let store = Arc::new(InMemoryPresenceStore::new());
        let first = create_tracker(store.clone(), "i1");
        let second = create_tracker(store, "i2");
        let r1 = room("r1");
        first.add(&r1, &user("carol")).await.unwrap();
        second.add(&r1, &user("alice")).await.unwrap();
        first.add(&r1, &user("alice")).await.unwrap();

        // when:
        let snapshot = first.snapshot(&r1).await.unwrap();

        // then:
        assert_eq!(snapshot.room_id, r1);
        assert_eq!(snapshot.users, vec![user("alice"), user("carol")]);
    }

    #[tokio::test]
    async fn test_user_stays_present_until_last_local_connection_leaves() {
        // Test: two endpoints of one instance hold the same user; one leaving keeps the entry
        // given:
        let tracker = create_tracker(Arc::new(InMemoryPresenceStore::new()), "i1");
        let r1 = room("r1");
        let relay_first = tracker.join(&r1, &user("A")).await.unwrap();
        let editor_first = tracker.join(&r1, &user("A")).await.unwrap();

        // when:
        let editor_last = tracker.leave(&r1, &user("A")).await.unwrap();

        // then:
        assert!(relay_first && !editor_first && !editor_last);
        assert_eq!(
            tracker.members(&r1).await.unwrap(),
            BTreeSet::from([user("A")])
        );

        // when:
        let relay_last = tracker.leave(&r1, &user("A")).await.unwrap();

        // then:
        assert!(relay_last);
        assert!(tracker.members(&r1).await.unwrap().is_empty());
        assert!(!tracker.holds(&r1, &user("A")));
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let tracker = create_tracker(Arc::new(InMemoryPresenceStore::new()), "i1");
        let r1 = room("r1");
        tracker.add(&r1, &user("A")).await.unwrap();

        assert!(!tracker.leave(&r1, &user("A")).await.unwrap());
        assert_eq!(tracker.members(&r1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leave_restores_entry_when_user_rejoined_meanwhile() {
        // Test: a removal that lands after a new join does not erase the live user
        // given:
        let store = Arc::new(SlowRemoveStore::default());
        let tracker = Arc::new(PresenceTracker::new(
            store.clone(),
            InstanceId::new("i1".to_string()).unwrap(),
            Duration::from_secs(60),
        ));
        let r1 = room("r1");
        tracker.join(&r1, &user("A")).await.unwrap();

        // when:
        let leaving = {
            let tracker = tracker.clone();
            let r1 = r1.clone();
            tokio::spawn(async move { tracker.leave(&r1, &user("A")).await })
        };
        store.remove_started.notified().await;
        tracker.join(&r1, &user("A")).await.unwrap();
        store.release_remove.notify_one();
        leaving.await.unwrap().unwrap();

        // then:
        assert_eq!(
            tracker.members(&r1).await.unwrap(),
            BTreeSet::from([user("A")])
        );
    }

    #[tokio::test]
    async fn test_refresh_local_covers_every_held_user() {
        let tracker = create_tracker(Arc::new(InMemoryPresenceStore::new()), "i1");
        tracker.join(&room("r1"), &user("A")).await.unwrap();
        tracker.join(&room("r1"), &user("A")).await.unwrap();
        tracker.join(&room("r2"), &user("B")).await.unwrap();

        assert_eq!(tracker.refresh_local().await, 2);
    }

    /// In-memory store whose removals wait until the test releases them.
    #[derive(Default)]
    struct SlowRemoveStore {
        inner: InMemoryPresenceStore,
        remove_started: tokio::sync::Notify,
        release_remove: tokio::sync::Notify,
    }

    #[async_trait]
    impl PresenceStore for SlowRemoveStore {
        async fn add(
            &self,
            room_id: &RoomId,
            member: &str,
            ttl: Duration,
        ) -> Result<(), PresenceError> {
            self.inner.add(room_id, member, ttl).await
        }

        async fn remove(&self, room_id: &RoomId, member: &str) -> Result<(), PresenceError> {
            self.remove_started.notify_one();
            self.release_remove.notified().await;
            self.inner.remove(room_id, member).await
        }

        async fn members(&self, room_id: &RoomId) -> Result<Vec<String>, PresenceError> {
            self.inner.members(room_id).await
        }
    }

    #[test]
    fn test_parse_entry_keeps_email_user_ids() {
        // Test: user ids containing '@' survive the instance suffix
        assert_eq!(
            parse_entry("alice@example.com@i1"),
            Some(user("alice@example.com"))
        );
        assert_eq!(parse_entry("bob"), Some(user("bob")));
        assert_eq!(parse_entry("@i1"), None);
    }
}
