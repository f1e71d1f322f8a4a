//! Request handlers and middleware.

pub mod admission;
pub mod http;
pub mod websocket;

pub use admission::{AdmissionError, rate_limit};
pub use http::{ApiError, get_presence, health_check};
pub use websocket::{editor_handler, yjs_handler, yjs_query_handler};
