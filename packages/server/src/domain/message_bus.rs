//! Broadcast bus port.
//!
//! The bus is shared by every relay instance. Messages are fire-and-forget
//! and delivered at most once per subscriber.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::{error::BusError, value_object::RoomId};

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusDelivery {
    pub channel: String,
    pub payload: String,
}

/// Stream of deliveries matching a pattern subscription.
pub type BusSubscription = BoxStream<'static, BusDelivery>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a channel.
    ///
    /// Returns the number of subscribers the message was handed to.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError>;

    /// Subscribe to every channel matching a glob pattern (`prefix*`).
    async fn psubscribe(&self, pattern: &str) -> Result<BusSubscription, BusError>;
}

/// Receives room subscription transitions from a connection registry.
///
/// Both methods run while the registry holds the room's shard, which keeps
/// transitions for one room strictly ordered. Implementations must not block
/// and must not call back into the registry.
pub trait RoomSubscriber: Send + Sync {
    /// The room went from zero to one local connections.
    fn subscribe(&self, room_id: &RoomId);

    /// The room went from one to zero local connections.
    fn unsubscribe(&self, room_id: &RoomId);
}

/// Subscriber for registries whose transport needs no per-room subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSubscriber;

impl RoomSubscriber for NoopSubscriber {
    fn subscribe(&self, _room_id: &RoomId) {}

    fn unsubscribe(&self, _room_id: &RoomId) {}
}
