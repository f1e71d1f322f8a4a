//! Broadcast bus adapters and the bridge between the bus and local rooms.
//!
//! - `inmemory`: process-wide pub/sub, shareable by several relay instances
//! - `bridge`: publishes room traffic and relays remote traffic to local
//!   connections

pub mod bridge;
pub mod inmemory;

pub use bridge::BroadcastBridge;
pub use inmemory::InMemoryMessageBus;
