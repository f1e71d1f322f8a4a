//! Value objects of the relay domain.
//!
//! Constructors validate their input so that the rest of the crate can treat
//! these types as trusted.

use std::{fmt, net::IpAddr};

use uuid::Uuid;

use super::error::ValueObjectError;

/// Longest room id accepted on any path.
pub const MAX_ROOM_ID_LENGTH: usize = 128;

/// Longest user id accepted from credential claims.
pub const MAX_USER_ID_LENGTH: usize = 256;

/// Identifier of a collaboration room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room id.
    ///
    /// # Errors
    ///
    /// Rejects empty ids, ids longer than [`MAX_ROOM_ID_LENGTH`] and ids
    /// containing whitespace, control characters or `/`.
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.is_empty() {
            return Err(ValueObjectError::RoomIdEmpty);
        }
        if value.chars().count() > MAX_ROOM_ID_LENGTH {
            return Err(ValueObjectError::RoomIdTooLong(MAX_ROOM_ID_LENGTH));
        }
        if value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '/')
        {
            return Err(ValueObjectError::RoomIdInvalidCharacter(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an authenticated participant, taken from credential claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::UserIdEmpty);
        }
        if value.chars().count() > MAX_USER_ID_LENGTH {
            return Err(ValueObjectError::UserIdTooLong(MAX_USER_ID_LENGTH));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-unique identifier of one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one relay process among the instances sharing a bus.
///
/// Never contains `@`, which separates user and instance in presence entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: String) -> Result<Self, ValueObjectError> {
        if value.is_empty() || value.contains('@') || value.chars().any(char::is_whitespace) {
            return Err(ValueObjectError::InstanceIdInvalid(value));
        }
        Ok(Self(value))
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network identity a client is rate limited by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey(IpAddr);

impl ClientKey {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is behind a connection, as far as the credential tells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Label used where an identity must be rendered even when absent.
    pub fn display_name(&self) -> &str {
        self.user_id
            .as_ref()
            .map(UserId::as_str)
            .or(self.email.as_deref())
            .unwrap_or("anonymous")
    }
}

/// Class of request a rate bucket is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Auth,
    Handshake,
    RoomMutation,
    SnapshotWrite,
    General,
    /// Frames received on an already open connection.
    Message,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 6] = [
        EndpointClass::Auth,
        EndpointClass::Handshake,
        EndpointClass::RoomMutation,
        EndpointClass::SnapshotWrite,
        EndpointClass::General,
        EndpointClass::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Auth => "auth",
            EndpointClass::Handshake => "handshake",
            EndpointClass::RoomMutation => "room_mutation",
            EndpointClass::SnapshotWrite => "snapshot_write",
            EndpointClass::General => "general",
            EndpointClass::Message => "message",
        }
    }

    /// Classify an HTTP request by method and path.
    ///
    /// Frames on open connections are never classified here; callers use
    /// [`EndpointClass::Message`] for them directly.
    pub fn classify(method: &str, path: &str) -> Self {
        let mutating = matches!(
            method.to_ascii_uppercase().as_str(),
            "POST" | "PUT" | "PATCH" | "DELETE"
        );

        if path.starts_with("/api/auth/") {
            EndpointClass::Auth
        } else if path.starts_with("/ws/") || path == "/ws" {
            EndpointClass::Handshake
        } else if path.starts_with("/api/rooms")
            && path.trim_end_matches('/').ends_with("/snapshot")
            && matches!(method.to_ascii_uppercase().as_str(), "POST" | "PUT")
        {
            EndpointClass::SnapshotWrite
        } else if path.starts_with("/api/rooms") && mutating {
            EndpointClass::RoomMutation
        } else {
            EndpointClass::General
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of a message travelling between instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Opaque document update from a client.
    Document,
    /// Full presence member list produced by the relay.
    Presence,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Document => "document",
            MessageKind::Presence => "presence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "document" => Some(MessageKind::Document),
            "presence" => Some(MessageKind::Presence),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_accepts_plain_identifier() {
        // Test: an ordinary room id is accepted as is
        // when:
        let room_id = RoomId::new("r1".to_string());

        // then:
        assert_eq!(room_id.unwrap().as_str(), "r1");
    }

    #[test]
    fn test_room_id_rejects_invalid_values() {
        // Test: empty, oversized and path-like room ids are rejected
        // given:
        let too_long = "x".repeat(MAX_ROOM_ID_LENGTH + 1);

        // when / then:
        assert_eq!(RoomId::new(String::new()), Err(ValueObjectError::RoomIdEmpty));
        assert_eq!(
            RoomId::new(too_long),
            Err(ValueObjectError::RoomIdTooLong(MAX_ROOM_ID_LENGTH))
        );
        assert!(matches!(
            RoomId::new("a/b".to_string()),
            Err(ValueObjectError::RoomIdInvalidCharacter(_))
        ));
        assert!(matches!(
            RoomId::new("a b".to_string()),
            Err(ValueObjectError::RoomIdInvalidCharacter(_))
        ));
    }

    #[test]
    fn test_user_id_rejects_blank() {
        // Test: blank user ids are rejected
        assert_eq!(UserId::new("  ".to_string()), Err(ValueObjectError::UserIdEmpty));
        assert!(UserId::new("alice@example.com".to_string()).is_ok());
    }

    #[test]
    fn test_instance_id_rejects_separator() {
        // Test: instance ids may not contain the presence entry separator
        assert!(InstanceId::new("node@1".to_string()).is_err());
        assert!(InstanceId::new("node-1".to_string()).is_ok());
        assert!(!InstanceId::generate().as_str().contains('@'));
    }

    #[test]
    fn test_identity_display_name_falls_back() {
        // Test: display name prefers user id, then email, then "anonymous"
        // given:
        let full = Identity {
            user_id: Some(UserId::new("u-1".to_string()).unwrap()),
            email: Some("a@example.com".to_string()),
        };
        let email_only = Identity {
            user_id: None,
            email: Some("a@example.com".to_string()),
        };

        // then:
        assert_eq!(full.display_name(), "u-1");
        assert_eq!(email_only.display_name(), "a@example.com");
        assert_eq!(Identity::anonymous().display_name(), "anonymous");
    }

    #[test]
    fn test_classify_endpoints() {
        // Test: HTTP requests map to their rate-limit class
        assert_eq!(EndpointClass::classify("POST", "/api/auth/login"), EndpointClass::Auth);
        assert_eq!(EndpointClass::classify("GET", "/ws/yjs/r1"), EndpointClass::Handshake);
        assert_eq!(EndpointClass::classify("GET", "/ws/editor"), EndpointClass::Handshake);
        assert_eq!(
            EndpointClass::classify("PUT", "/api/rooms/r1/snapshot"),
            EndpointClass::SnapshotWrite
        );
        assert_eq!(
            EndpointClass::classify("DELETE", "/api/rooms/r1"),
            EndpointClass::RoomMutation
        );
        assert_eq!(EndpointClass::classify("post", "/api/rooms"), EndpointClass::RoomMutation);
        assert_eq!(
            EndpointClass::classify("GET", "/api/rooms/r1/snapshot"),
            EndpointClass::General
        );
        assert_eq!(
            EndpointClass::classify("GET", "/api/rooms/r1/presence"),
            EndpointClass::General
        );
        assert_eq!(EndpointClass::classify("GET", "/api/health"), EndpointClass::General);
    }

    #[test]
    fn test_message_kind_round_trip_names() {
        // Test: every kind parses back from its wire name
        for kind in [MessageKind::Document, MessageKind::Presence] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("chat"), None);
    }
}
