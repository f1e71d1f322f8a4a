//! Per-room registry of the connections open on this instance.
//!
//! ## Responsibilities
//!
//! - Keep room id -> live connections, sharded by room so that joins and
//!   leaves in one room never wait on another room.
//! - Report subscription transitions (0 -> 1 and 1 -> 0 local connections)
//!   to a [`RoomSubscriber`] while the room's shard is held.
//! - Deliver a payload to every local connection of a room.

use std::{collections::HashMap, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::domain::{Connection, ConnectionId, RoomId, RoomSubscriber};

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Arrival {
    /// The connection was not registered before.
    pub inserted: bool,
    /// The room went from zero to one local connections.
    pub room_opened: bool,
}

/// Outcome of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Departure {
    /// The connection was registered until now.
    pub removed: bool,
    /// The room went from one to zero local connections.
    pub room_closed: bool,
}

pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Connection>>,
    subscriber: Arc<dyn RoomSubscriber>,
}

impl ConnectionRegistry {
    pub fn new(subscriber: Arc<dyn RoomSubscriber>) -> Self {
        Self {
            rooms: DashMap::new(),
            subscriber,
        }
    }

    /// Add a connection to its room. Registering the same connection twice is
    /// a no-op.
    pub fn register(&self, connection: &Connection) -> Arrival {
        match self.rooms.entry(connection.room_id().clone()) {
            Entry::Occupied(mut occupied) => {
                let connections = occupied.get_mut();
                if connections.contains_key(&connection.id()) {
                    return Arrival::default();
                }
                connections.insert(connection.id(), connection.clone());
                Arrival {
                    inserted: true,
                    room_opened: false,
                }
            }
            Entry::Vacant(vacant) => {
                self.subscriber.subscribe(vacant.key());
                tracing::debug!(room_id = %vacant.key(), "Room opened on this instance");
                let mut connections = HashMap::new();
                connections.insert(connection.id(), connection.clone());
                vacant.insert(connections);
                Arrival {
                    inserted: true,
                    room_opened: true,
                }
            }
        }
    }

    /// Remove a connection from its room. Unregistering an unknown
    /// connection is a no-op.
    pub fn unregister(&self, connection: &Connection) -> Departure {
        let Entry::Occupied(mut occupied) = self.rooms.entry(connection.room_id().clone()) else {
            return Departure::default();
        };

        let connections = occupied.get_mut();
        if connections.remove(&connection.id()).is_none() {
            return Departure::default();
        }
        let room_closed = connections.is_empty();
        if room_closed {
            self.subscriber.unsubscribe(occupied.key());
            tracing::debug!(room_id = %occupied.key(), "Room closed on this instance");
            occupied.remove();
        }

        Departure {
            removed: true,
            room_closed,
        }
    }

    /// Send `payload` to every connection of the room open at call time,
    /// except `exclude`.
    ///
    /// Returns the number of connections the payload was handed to. A failed
    /// send is logged and does not stop delivery to the others.
    pub fn broadcast_local(
        &self,
        room_id: &RoomId,
        payload: &str,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets: Vec<Connection> = match self.rooms.get(room_id) {
            Some(connections) => connections
                .values()
                .filter(|c| Some(c.id()) != exclude)
                .cloned()
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for target in targets {
            match target.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        room_id = %room_id,
                        connection_id = %target.id(),
                        "Failed to deliver to connection: {}",
                        e
                    );
                }
            }
        }
        delivered
    }

    pub fn connection_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |c| c.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClientKey, Identity, UserId};
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Mutex,
    };
    use tokio::sync::mpsc;

    /// Records every subscription transition in order.
    #[derive(Default)]
    struct RecordingSubscriber {
        events: Mutex<Vec<(String, RoomId)>>,
    }

    impl RecordingSubscriber {
        fn count(&self, kind: &str, room_id: &RoomId) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, r)| k == kind && r == room_id)
                .count()
        }
    }

    impl RoomSubscriber for RecordingSubscriber {
        fn subscribe(&self, room_id: &RoomId) {
            self.events
                .lock()
                .unwrap()
                .push(("subscribe".to_string(), room_id.clone()));
        }

        fn unsubscribe(&self, room_id: &RoomId) {
            self.events
                .lock()
                .unwrap()
                .push(("unsubscribe".to_string(), room_id.clone()));
        }
    }

    fn room(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    fn create_connection(
        room_id: &str,
        user: Option<&str>,
    ) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: user.map(|u| UserId::new(u.to_string()).unwrap()),
            email: None,
        };
        let connection = Connection::new(
            room(room_id),
            identity,
            None,
            ClientKey::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            0,
            tx,
        );
        (connection, rx)
    }

    fn create_registry() -> (ConnectionRegistry, Arc<RecordingSubscriber>) {
        let subscriber = Arc::new(RecordingSubscriber::default());
        (ConnectionRegistry::new(subscriber.clone()), subscriber)
    }

    #[test]
    fn test_register_and_unregister_are_idempotent() {
        // Test: repeated register/unregister of one connection changes state once
        // given:
        let (registry, subscriber) = create_registry();
        let (conn, _rx) = create_connection("r1", Some("alice"));

        // when:
        let first = registry.register(&conn);
        let second = registry.register(&conn);

        // then:
        assert!(first.inserted && first.room_opened);
        assert_eq!(second, Arrival::default());
        assert_eq!(registry.connection_count(&room("r1")), 1);

        // when:
        let first = registry.unregister(&conn);
        let second = registry.unregister(&conn);

        // then:
        assert!(first.removed && first.room_closed);
        assert_eq!(second, Departure::default());
        assert_eq!(registry.connection_count(&room("r1")), 0);
        assert_eq!(subscriber.count("subscribe", &room("r1")), 1);
        assert_eq!(subscriber.count("unsubscribe", &room("r1")), 1);
    }

    #[test]
    fn test_second_tab_keeps_room_open() {
        // Test: the room stays open while another tab of the same user is connected
        // given:
        let (registry, subscriber) = create_registry();
        let (tab1, _rx1) = create_connection("r1", Some("alice"));
        let (tab2, _rx2) = create_connection("r1", Some("alice"));
        registry.register(&tab1);
        let arrival = registry.register(&tab2);

        // when:
        let departure = registry.unregister(&tab1);

        // then:
        assert!(arrival.inserted && !arrival.room_opened);
        assert!(departure.removed && !departure.room_closed);
        assert_eq!(registry.connection_count(&room("r1")), 1);
        assert_eq!(subscriber.count("unsubscribe", &room("r1")), 0);
    }

    #[tokio::test]
    async fn test_broadcast_local_excludes_sender() {
        // Test: local broadcast reaches every room member except the excluded one
        // given:
        let (registry, _subscriber) = create_registry();
        let (alice, mut alice_rx) = create_connection("r1", Some("alice"));
        let (bob, mut bob_rx) = create_connection("r1", Some("bob"));
        let (carol, mut carol_rx) = create_connection("r2", Some("carol"));
        registry.register(&alice);
        registry.register(&bob);
        registry.register(&carol);

        // when:
        let delivered = registry.broadcast_local(&room("r1"), "hello", Some(alice.id()));

        // then:
        assert_eq!(delivered, 1);
        assert_eq!(bob_rx.recv().await, Some("hello".to_string()));
        assert!(alice_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_local_continues_past_broken_connection() {
        // Test: one failed send does not stop delivery to the others
        // given:
        let (registry, _subscriber) = create_registry();
        let (broken, broken_rx) = create_connection("r1", Some("alice"));
        let (closed, _closed_rx) = create_connection("r1", Some("bob"));
        let (healthy, mut healthy_rx) = create_connection("r1", Some("carol"));
        registry.register(&broken);
        registry.register(&closed);
        registry.register(&healthy);
        drop(broken_rx);
        closed.close();

        // when:
        let delivered = registry.broadcast_local(&room("r1"), "update", None);

        // then:
        assert_eq!(delivered, 1);
        assert_eq!(healthy_rx.recv().await, Some("update".to_string()));
    }

    #[test]
    fn test_broadcast_to_unknown_room_is_noop() {
        let (registry, _subscriber) = create_registry();
        assert_eq!(registry.broadcast_local(&room("nobody"), "x", None), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lifecycles_keep_subscriptions_balanced() {
        // Test: arbitrary interleaving of connects and disconnects keeps
        // subscribe/unsubscribe paired with 0->1 and 1->0 transitions
        // given:
        let (registry, subscriber) = create_registry();
        let registry = Arc::new(registry);

        // when:
        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let room_id = if i % 2 == 0 { "r1" } else { "r2" };
                for _ in 0..50 {
                    let (conn, _rx) = create_connection(room_id, Some("user"));
                    registry.register(&conn);
                    tokio::task::yield_now().await;
                    registry.unregister(&conn);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // then:
        assert_eq!(registry.connection_count(&room("r1")), 0);
        assert_eq!(registry.connection_count(&room("r2")), 0);
        let events = subscriber.events.lock().unwrap();
        for room_id in [room("r1"), room("r2")] {
            let mut open = 0i32;
            for (kind, r) in events.iter().filter(|(_, r)| *r == room_id) {
                match kind.as_str() {
                    "subscribe" => open += 1,
                    _ => open -= 1,
                }
                assert!((0..=1).contains(&open), "{} subscribed twice", r);
            }
            assert_eq!(open, 0);
        }
    }
}
