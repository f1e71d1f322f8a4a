//! Presence store adapters.

pub mod inmemory;

pub use inmemory::InMemoryPresenceStore;
