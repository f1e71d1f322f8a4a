//! Domain layer.
//!
//! Value objects, entities, the ports the relay depends on and the pure
//! domain services built on them. Nothing here knows about axum or about a
//! concrete bus, store or log.

pub mod entity;
pub mod error;
pub mod event_log;
pub mod fanout;
pub mod message_bus;
pub mod presence;
pub mod token_service;
pub mod value_object;

pub use entity::{BusMessage, Connection, EditorEvent, PresenceSnapshot, PusherChannel};
pub use error::{
    BusError, DeliveryError, EventLogError, FanoutError, PresenceError, RejectReason, TokenError,
    ValueObjectError,
};
pub use event_log::{EventLog, LogRecord};
pub use fanout::FanoutTransport;
pub use message_bus::{BusDelivery, BusSubscription, MessageBus, NoopSubscriber, RoomSubscriber};
pub use presence::{PresenceStore, PresenceTracker};
pub use token_service::{Claims, TokenKind, TokenService};
pub use value_object::{
    ClientKey, ConnectionId, EndpointClass, Identity, InstanceId, MessageKind, RoomId, UserId,
};
