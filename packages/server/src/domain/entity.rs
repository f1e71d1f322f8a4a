//! Domain entities.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;

use super::{
    error::DeliveryError,
    value_object::{ClientKey, ConnectionId, Identity, InstanceId, MessageKind, RoomId, UserId},
};

/// Channel through which the socket task receives frames to write.
pub type PusherChannel = mpsc::UnboundedSender<String>;

/// One open bidirectional channel to one client.
///
/// Cloning is cheap and every clone refers to the same connection, so the
/// registry can hand out snapshots without copying connection state.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    room_id: RoomId,
    identity: Identity,
    origin: Option<String>,
    client_key: ClientKey,
    connected_at: i64,
    sender: PusherChannel,
    open: AtomicBool,
}

impl Connection {
    pub fn new(
        room_id: RoomId,
        identity: Identity,
        origin: Option<String>,
        client_key: ClientKey,
        connected_at: i64,
        sender: PusherChannel,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::generate(),
                room_id,
                identity,
                origin,
                client_key,
                connected_at,
                sender,
                open: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.inner.identity.user_id.as_ref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.inner.origin.as_deref()
    }

    pub fn client_key(&self) -> ClientKey {
        self.inner.client_key
    }

    pub fn connected_at(&self) -> i64 {
        self.inner.connected_at
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire) && !self.inner.sender.is_closed()
    }

    /// Mark the connection closed.
    ///
    /// Returns `true` only for the call that actually performed the
    /// transition, which lets teardown run exactly once.
    pub fn close(&self) -> bool {
        self.inner
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queue a text frame for this connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] once the connection has been closed
    /// or its socket task has gone away.
    pub fn send(&self, payload: &str) -> Result<(), DeliveryError> {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed(self.inner.id.to_string()));
        }
        self.inner
            .sender
            .send(payload.to_string())
            .map_err(|_| DeliveryError::Closed(self.inner.id.to_string()))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

/// A message travelling over the broadcast bus between instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub room_id: RoomId,
    pub kind: MessageKind,
    /// Opaque payload forwarded verbatim to connections.
    pub content: String,
    pub user_id: Option<UserId>,
    /// Unix timestamp (milliseconds) at publish time.
    pub timestamp: i64,
    /// Instance that published the message, used to skip its own echo.
    pub origin: Option<InstanceId>,
}

/// Structured edit event carried by the durable event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorEvent {
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    pub kind: Option<String>,
    /// The record exactly as received; this is what gets re-broadcast.
    pub raw: String,
}

/// Full presence member list of a room at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub room_id: RoomId,
    /// Sorted, distinct.
    pub users: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn create_test_connection() -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(
            RoomId::new("r1".to_string()).unwrap(),
            Identity::anonymous(),
            None,
            ClientKey::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            1000,
            tx,
        );
        (connection, rx)
    }

    #[tokio::test]
    async fn test_send_delivers_to_channel() {
        // Test: an open connection forwards frames to its socket task
        // given:
        let (connection, mut rx) = create_test_connection();

        // when:
        let result = connection.send("hello");

        // then:
        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[test]
    fn test_close_transitions_exactly_once() {
        // Test: only the first close reports the transition and sends stop afterwards
        // given:
        let (connection, _rx) = create_test_connection();
        let clone = connection.clone();

        // when:
        let first = connection.close();
        let second = clone.close();

        // then:
        assert!(first);
        assert!(!second);
        assert!(!clone.is_open());
        assert!(matches!(connection.send("late"), Err(DeliveryError::Closed(_))));
    }

    #[test]
    fn test_send_fails_when_socket_task_is_gone() {
        // Test: a dropped receiver surfaces as a closed connection
        // given:
        let (connection, rx) = create_test_connection();
        drop(rx);

        // then:
        assert!(!connection.is_open());
        assert!(connection.send("hello").is_err());
    }

    #[test]
    fn test_clones_compare_equal() {
        // Test: clones refer to the same connection
        let (a, _rx_a) = create_test_connection();
        let (b, _rx_b) = create_test_connection();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
