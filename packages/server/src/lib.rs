//! Real-time relay for collaborative editing.
//!
//! Clients connect to a room over WebSocket; every message one client sends
//! reaches every other client of that room, on this instance and on every
//! other instance sharing the same bus. Who is in a room is tracked in a
//! shared presence store.

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
