//! Domain errors.

use thiserror::Error;

/// Validation failures of value objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("room id must not be empty")]
    RoomIdEmpty,

    #[error("room id must be at most {0} characters")]
    RoomIdTooLong(usize),

    #[error("room id '{0}' contains an invalid character")]
    RoomIdInvalidCharacter(String),

    #[error("user id must not be empty")]
    UserIdEmpty,

    #[error("user id must be at most {0} characters")]
    UserIdTooLong(usize),

    #[error("instance id '{0}' is invalid")]
    InstanceIdInvalid(String),
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("origin is not in the allowlist")]
    OriginNotAllowed,

    #[error("no credential supplied")]
    NoCredential,

    #[error("credential is invalid or expired")]
    InvalidCredential,
}

impl RejectReason {
    /// Reason code written to the logs.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::OriginNotAllowed => "origin_not_allowed",
            RejectReason::NoCredential => "no_credential",
            RejectReason::InvalidCredential => "invalid_credential",
        }
    }
}

/// Failure to hand a payload to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(String),
}

/// Token service failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token secret must be at least {0} bytes")]
    WeakSecret(usize),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Failures of the shared presence store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the broadcast bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("failed to serialize bus message: {0}")]
    Serialization(String),

    #[error("bus transport failure: {0}")]
    Transport(String),

    #[error("invalid channel pattern '{0}'")]
    InvalidPattern(String),
}

/// Failures of the durable event log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventLogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    #[error("offset {offset} is beyond the end of topic '{topic}'")]
    OffsetOutOfRange { topic: String, offset: u64 },
}

/// Failures of a fan-out transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FanoutError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error("message is not valid for this transport: {0}")]
    Rejected(String),
}
