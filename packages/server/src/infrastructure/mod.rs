//! Infrastructure layer.
//!
//! Concrete adapters for the domain ports plus the in-process structures the
//! relay runs on (connection registry, rate governor).

pub mod connection_registry;
pub mod dto;
pub mod event_log;
pub mod message_bus;
pub mod presence;
pub mod rate_governor;
pub mod token;

pub use connection_registry::{Arrival, ConnectionRegistry, Departure};
pub use event_log::{EventLogConsumer, EventLogProducer, InMemoryEventLog};
pub use message_bus::{BroadcastBridge, InMemoryMessageBus};
pub use presence::InMemoryPresenceStore;
pub use rate_governor::{RateGovernor, RateQuotas};
pub use token::HmacTokenService;
