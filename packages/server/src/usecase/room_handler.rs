//! UseCase: per-connection lifecycle in a room.
//!
//! A [`RoomHandler`] receives the three lifecycle callbacks of every
//! connection. [`RelayRoomHandler`] implements them once for both message
//! classes; what differs between the primary and the legacy path is the
//! fan-out transport and how inbound frames are validated.
//!
//! Fan-out rule: when the transport does not deliver back to this
//! instance, the handler first delivers to the sender's local peers and then
//! publishes for the other instances. When it does loop back, publishing is
//! all there is to do.

use std::sync::Arc;

use async_trait::async_trait;
use tandem_shared::time::Clock;

use crate::{
    domain::{
        BusMessage, Connection, EditorEvent, FanoutTransport, MessageKind, PresenceTracker, RoomId,
    },
    infrastructure::{connection_registry::ConnectionRegistry, dto::websocket::PresenceMessage},
};

/// How inbound frames of a handler are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Arbitrary opaque text, relayed untouched.
    Opaque,
    /// Structured edit events; frames that do not decode are dropped.
    EditorEvent,
}

impl MessageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::Opaque => "opaque",
            MessageClass::EditorEvent => "editor_event",
        }
    }
}

#[async_trait]
pub trait RoomHandler: Send + Sync {
    /// The connection passed admission and is ready to receive.
    async fn on_open(&self, connection: &Connection);

    /// A text frame arrived on the connection.
    async fn on_message(&self, connection: &Connection, payload: String);

    /// The connection ended. Teardown runs once however often this is called.
    async fn on_close(&self, connection: &Connection);
}

pub struct RelayRoomHandler {
    class: MessageClass,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn FanoutTransport>,
    presence: Arc<PresenceTracker>,
    clock: Arc<dyn Clock>,
}

impl RelayRoomHandler {
    pub fn new(
        class: MessageClass,
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn FanoutTransport>,
        presence: Arc<PresenceTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            class,
            registry,
            transport,
            presence,
            clock,
        }
    }

    /// Deliver the room's full member list to its connections.
    ///
    /// With `only` set, the list goes to that connection alone.
    async fn announce_presence(&self, room_id: &RoomId, only: Option<&Connection>) {
        let snapshot = match self.presence.snapshot(room_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(room_id = %room_id, "Failed to read presence: {}", e);
                return;
            }
        };
        let payload = match serde_json::to_string(&PresenceMessage::from(&snapshot)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to serialize presence message: {}", e);
                return;
            }
        };

        if let Some(connection) = only {
            if let Err(e) = connection.send(&payload) {
                tracing::debug!(
                    connection_id = %connection.id(),
                    "Presence not delivered: {}",
                    e
                );
            }
            return;
        }

        self.registry.broadcast_local(room_id, &payload, None);
        // a looping transport carries only this class's frames
        if !self.transport.loops_back() {
            self.publish(BusMessage {
                room_id: room_id.clone(),
                kind: MessageKind::Presence,
                content: payload,
                user_id: None,
                timestamp: self.clock.now_millis(),
                origin: None,
            })
            .await;
        }
    }

    async fn publish(&self, message: BusMessage) {
        let room_id = message.room_id.clone();
        if let Err(e) = self.transport.publish(message).await {
            tracing::warn!(
                room_id = %room_id,
                transport = self.transport.name(),
                "Publish failed, message dropped: {}",
                e
            );
        }
    }

    /// Validate an inbound frame for this handler's class.
    ///
    /// Returns `None` when the frame must be dropped.
    fn accept(&self, connection: &Connection, payload: &str) -> Option<MessageKind> {
        match self.class {
            MessageClass::Opaque => Some(MessageKind::Document),
            MessageClass::EditorEvent => match EditorEvent::decode(payload) {
                Ok(event) if &event.room_id == connection.room_id() => Some(MessageKind::Document),
                Ok(event) => {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        room_id = %connection.room_id(),
                        target = %event.room_id,
                        "Dropping event addressed to another room"
                    );
                    None
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        "Dropping malformed event: {}",
                        e
                    );
                    None
                }
            },
        }
    }
}

#[async_trait]
impl RoomHandler for RelayRoomHandler {
    async fn on_open(&self, connection: &Connection) {
        let arrival = self.registry.register(connection);
        if !arrival.inserted {
            return;
        }
        tracing::info!(
            class = self.class.as_str(),
            room_id = %connection.room_id(),
            connection_id = %connection.id(),
            user = connection.identity().display_name(),
            origin = connection.origin().unwrap_or("-"),
            client = %connection.client_key(),
            room_connections = self.registry.connection_count(connection.room_id()),
            "Connection opened"
        );

        let Some(user_id) = connection.user_id() else {
            self.announce_presence(connection.room_id(), Some(connection))
                .await;
            return;
        };
        match self.presence.join(connection.room_id(), user_id).await {
            Ok(true) => self.announce_presence(connection.room_id(), None).await,
            Ok(false) => {
                self.announce_presence(connection.room_id(), Some(connection))
                    .await;
            }
            Err(e) => {
                tracing::warn!(room_id = %connection.room_id(), "Failed to add presence: {}", e);
                self.announce_presence(connection.room_id(), None).await;
            }
        }
    }

    async fn on_message(&self, connection: &Connection, payload: String) {
        if !connection.is_open() {
            return;
        }
        let Some(kind) = self.accept(connection, &payload) else {
            return;
        };

        if !self.transport.loops_back() {
            self.registry
                .broadcast_local(connection.room_id(), &payload, Some(connection.id()));
        }

        self.publish(BusMessage {
            room_id: connection.room_id().clone(),
            kind,
            content: payload,
            user_id: connection.user_id().cloned(),
            timestamp: self.clock.now_millis(),
            origin: None,
        })
        .await;
    }

    async fn on_close(&self, connection: &Connection) {
        if !connection.close() {
            return;
        }
        let departure = self.registry.unregister(connection);
        tracing::info!(
            class = self.class.as_str(),
            room_id = %connection.room_id(),
            connection_id = %connection.id(),
            room_closed = departure.room_closed,
            connected_ms = self.clock.now_millis() - connection.connected_at(),
            "Connection closed"
        );

        if !departure.removed {
            return;
        }
        let Some(user_id) = connection.user_id() else {
            return;
        };
        match self.presence.leave(connection.room_id(), user_id).await {
            Ok(true) => self.announce_presence(connection.room_id(), None).await,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(room_id = %connection.room_id(), "Failed to remove presence: {}", e);
                self.announce_presence(connection.room_id(), None).await;
            }
        }
    }
}
