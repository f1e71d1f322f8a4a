//! UseCase layer.
//!
//! - `authenticate_handshake`: admission of a connection handshake
//! - `room_handler`: open / message / close lifecycle of admitted connections

pub mod authenticate_handshake;
pub mod room_handler;

pub use authenticate_handshake::{CREDENTIAL_PROTOCOL, CredentialSource, HandshakeAuthenticator};
pub use room_handler::{MessageClass, RelayRoomHandler, RoomHandler};
