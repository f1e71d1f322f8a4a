//! Data Transfer Objects.
//!
//! DTOs are organized by where they travel:
//! - `websocket`: frames sent to and received from clients
//! - `bus`: envelopes exchanged between instances
//! - `http`: HTTP API response bodies

pub mod bus;
pub mod conversion;
pub mod http;
pub mod websocket;

pub use conversion::DecodeError;
