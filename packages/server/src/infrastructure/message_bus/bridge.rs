//! Bridge between the broadcast bus and this instance's rooms.
//!
//! ## Responsibilities
//!
//! - Publish room traffic on `<prefix><roomId>`, tagged with this
//!   instance's id.
//! - Track which rooms are served locally. The connection registry drives
//!   this through [`RoomSubscriber`] on its 0 -> 1 and 1 -> 0 transitions.
//! - Listen on `<prefix>*` and hand remote traffic for locally served rooms
//!   to the registry, without exclusion.
//!
//! Envelopes carrying this instance's own id are ignored: the sender's
//! local peers were already served directly before publishing.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::{
    domain::{
        BusError, BusMessage, FanoutError, FanoutTransport, InstanceId, MessageBus, RoomId,
        RoomSubscriber,
    },
    infrastructure::{connection_registry::ConnectionRegistry, dto::bus::BusEnvelope},
};

pub struct BroadcastBridge {
    bus: Arc<dyn MessageBus>,
    instance_id: InstanceId,
    prefix: String,
    subscriptions: DashSet<RoomId>,
}

impl BroadcastBridge {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        instance_id: InstanceId,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            instance_id,
            prefix: prefix.into(),
            subscriptions: DashSet::new(),
        }
    }

    pub fn channel_for(&self, room_id: &RoomId) -> String {
        format!("{}{}", self.prefix, room_id)
    }

    pub fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.subscriptions.contains(room_id)
    }

    pub fn subscribed_rooms(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subscribe to every room channel and spawn the listener task.
    ///
    /// The pattern subscription is in place when this returns, so nothing
    /// published afterwards is missed.
    pub async fn start(
        self: Arc<Self>,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<JoinHandle<()>, BusError> {
        let pattern = format!("{}*", self.prefix);
        let mut deliveries = self.bus.psubscribe(&pattern).await?;
        tracing::info!(pattern = %pattern, instance_id = %self.instance_id, "Bus listener started");

        Ok(tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                self.on_message(&registry, &delivery.channel, &delivery.payload);
            }
            tracing::warn!("Bus subscription ended");
        }))
    }

    /// Route one bus message to the local connections of its room.
    ///
    /// Returns the number of local connections the content was handed to.
    pub fn on_message(&self, registry: &ConnectionRegistry, channel: &str, raw: &str) -> usize {
        let Some(room_id) = channel
            .strip_prefix(self.prefix.as_str())
            .and_then(|room| RoomId::new(room.to_string()).ok())
        else {
            tracing::debug!(channel = %channel, "Ignoring message on foreign channel");
            return 0;
        };

        if !self.is_subscribed(&room_id) {
            return 0;
        }

        let message = match BusEnvelope::decode(raw).and_then(|e| e.into_message(room_id.clone())) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(room_id = %room_id, "Dropping undecodable bus message: {}", e);
                return 0;
            }
        };

        if message.origin.as_ref() == Some(&self.instance_id) {
            return 0;
        }

        tracing::debug!(
            room_id = %room_id,
            kind = message.kind.as_str(),
            "Relaying bus message to local connections"
        );
        registry.broadcast_local(&room_id, &message.content, None)
    }
}

impl RoomSubscriber for BroadcastBridge {
    fn subscribe(&self, room_id: &RoomId) {
        if self.subscriptions.insert(room_id.clone()) {
            tracing::debug!(channel = %self.channel_for(room_id), "Subscribed room");
        }
    }

    fn unsubscribe(&self, room_id: &RoomId) {
        if self.subscriptions.remove(room_id).is_some() {
            tracing::debug!(channel = %self.channel_for(room_id), "Unsubscribed room");
        }
    }
}

#[async_trait]
impl FanoutTransport for BroadcastBridge {
    async fn publish(&self, mut message: BusMessage) -> Result<(), FanoutError> {
        message.origin = Some(self.instance_id.clone());
        let payload = serde_json::to_string(&BusEnvelope::from(&message))
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        let receivers = self
            .bus
            .publish(&self.channel_for(&message.room_id), payload)
            .await?;
        tracing::trace!(room_id = %message.room_id, receivers, "Published to bus");
        Ok(())
    }

    fn loops_back(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "bus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ClientKey, Connection, Identity, MessageKind, UserId},
        infrastructure::message_bus::InMemoryMessageBus,
    };
    use std::{
        net::{IpAddr, Ipv4Addr},
        time::Duration,
    };
    use tokio::sync::mpsc;

    const PREFIX: &str = "yjs:room:";

    fn room(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    fn instance(id: &str) -> InstanceId {
        InstanceId::new(id.to_string()).unwrap()
    }

    /// One relay instance: bridge plus the registry it feeds.
    fn create_instance(
        bus: &InMemoryMessageBus,
        id: &str,
    ) -> (Arc<BroadcastBridge>, Arc<ConnectionRegistry>) {
        let bridge = Arc::new(BroadcastBridge::new(Arc::new(bus.clone()), instance(id), PREFIX));
        let registry = Arc::new(ConnectionRegistry::new(bridge.clone()));
        (bridge, registry)
    }

    fn join(
        registry: &ConnectionRegistry,
        room_id: &str,
    ) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection::new(
            room(room_id),
            Identity::anonymous(),
            None,
            ClientKey::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            0,
            tx,
        );
        registry.register(&connection);
        (connection, rx)
    }

    fn document(room_id: &str, content: &str) -> BusMessage {
        BusMessage {
            room_id: room(room_id),
            kind: MessageKind::Document,
            content: content.to_string(),
            user_id: Some(UserId::new("alice".to_string()).unwrap()),
            timestamp: 1,
            origin: None,
        }
    }

    #[test]
    fn test_registry_transitions_drive_subscriptions() {
        // given:
        let bus = InMemoryMessageBus::new();
        let (bridge, registry) = create_instance(&bus, "i1");

        // when:
        let (first, _rx1) = join(&registry, "r1");
        let (second, _rx2) = join(&registry, "r1");

        // then:
        assert!(bridge.is_subscribed(&room("r1")));
        assert_eq!(bridge.subscribed_rooms(), 1);

        // when:
        registry.unregister(&first);
        assert!(bridge.is_subscribed(&room("r1")));
        registry.unregister(&second);

        // then:
        assert!(!bridge.is_subscribed(&room("r1")));
    }

    #[tokio::test]
    async fn test_remote_message_reaches_every_local_connection() {
        // Test: a message published by another instance is delivered without exclusion
        // given:
        let bus = InMemoryMessageBus::new();
        let (bridge_a, registry_a) = create_instance(&bus, "a");
        let (bridge_b, registry_b) = create_instance(&bus, "b");
        let _listener = bridge_b.clone().start(registry_b.clone()).await.unwrap();
        let (_b1, mut rx1) = join(&registry_b, "r1");
        let (_b2, mut rx2) = join(&registry_b, "r1");
        let (_a1, mut rx_a) = join(&registry_a, "r1");

        // when:
        bridge_a.publish(document("r1", "hello")).await.unwrap();

        // then:
        let wait = Duration::from_secs(1);
        assert_eq!(tokio::time::timeout(wait, rx1.recv()).await.unwrap().unwrap(), "hello");
        assert_eq!(tokio::time::timeout(wait, rx2.recv()).await.unwrap().unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_own_envelopes_are_ignored() {
        // Test: an envelope tagged with this instance's id is never delivered locally again
        // given:
        let bus = InMemoryMessageBus::new();
        let (bridge, registry) = create_instance(&bus, "i1");
        let (_conn, mut rx) = join(&registry, "r1");
        let mut own = document("r1", "echo");
        own.origin = Some(instance("i1"));
        let raw = serde_json::to_string(&BusEnvelope::from(&own)).unwrap();

        // when:
        let delivered = bridge.on_message(&registry, "yjs:room:r1", &raw);

        // then:
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribed_room_and_garbage_are_dropped() {
        // given:
        let bus = InMemoryMessageBus::new();
        let (bridge, registry) = create_instance(&bus, "i1");
        let (_conn, mut rx) = join(&registry, "r1");
        let raw = serde_json::to_string(&BusEnvelope::from(&document("r2", "x"))).unwrap();

        // when:
        let other_room = bridge.on_message(&registry, "yjs:room:r2", &raw);
        let garbage = bridge.on_message(&registry, "yjs:room:r1", "{not json");
        let foreign = bridge.on_message(&registry, "chat:r1", &raw);

        // then:
        assert_eq!((other_room, garbage, foreign), (0, 0, 0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_tags_envelope_with_instance_and_channel() {
        // given:
        let bus = InMemoryMessageBus::new();
        let mut subscription = bus.psubscribe("yjs:room:*").await.unwrap();
        let (bridge, _registry) = create_instance(&bus, "i1");

        // when:
        bridge.publish(document("r1", "payload")).await.unwrap();

        // then:
        let delivery = subscription.next().await.unwrap();
        assert_eq!(delivery.channel, "yjs:room:r1");
        let envelope = BusEnvelope::decode(&delivery.payload).unwrap();
        assert_eq!(envelope.instance_id.as_deref(), Some("i1"));
        assert_eq!(envelope.r#type, "document");
        assert_eq!(envelope.content, "payload");
    }
}
