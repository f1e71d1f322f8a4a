//! Conversion logic between DTOs and domain entities.

use crate::domain::{
    BusMessage, EditorEvent, InstanceId, MessageKind, PresenceSnapshot, RoomId, UserId,
    ValueObjectError,
};

use super::{
    bus::BusEnvelope,
    http::PresenceDto,
    websocket::{EditorEventDto, PresenceMessage},
};

/// Why an inbound payload could not be turned into a domain value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid room id: {0}")]
    RoomId(#[from] ValueObjectError),

    #[error("unknown message type '{0}'")]
    UnknownKind(String),
}

// ========================================
// DTO -> Domain
// ========================================

impl BusEnvelope {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Attach the room the envelope arrived for.
    ///
    /// Unusable `userId` and `instanceId` values are dropped rather than
    /// failing the whole envelope.
    pub fn into_message(self, room_id: RoomId) -> Result<BusMessage, DecodeError> {
        let kind = MessageKind::parse(&self.r#type).ok_or(DecodeError::UnknownKind(self.r#type))?;
        Ok(BusMessage {
            room_id,
            kind,
            content: self.content,
            user_id: self.user_id.and_then(|u| UserId::new(u).ok()),
            timestamp: self.timestamp,
            origin: self.instance_id.and_then(|i| InstanceId::new(i).ok()),
        })
    }
}

impl EditorEvent {
    /// Decode a legacy edit event, keeping the raw frame for re-broadcast.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let dto: EditorEventDto = serde_json::from_str(raw)?;
        Ok(Self {
            room_id: RoomId::new(dto.room_id)?,
            user_id: dto.user_id.and_then(|u| UserId::new(u).ok()),
            kind: dto.kind,
            raw: raw.to_string(),
        })
    }
}

// ========================================
// Domain -> DTO
// ========================================

impl From<&BusMessage> for BusEnvelope {
    fn from(message: &BusMessage) -> Self {
        Self {
            r#type: message.kind.as_str().to_string(),
            content: message.content.clone(),
            user_id: message.user_id.as_ref().map(|u| u.as_str().to_string()),
            timestamp: message.timestamp,
            instance_id: message.origin.as_ref().map(|i| i.as_str().to_string()),
        }
    }
}

impl From<&PresenceSnapshot> for PresenceMessage {
    fn from(snapshot: &PresenceSnapshot) -> Self {
        PresenceMessage::new(
            snapshot
                .users
                .iter()
                .map(|u| u.as_str().to_string())
                .collect(),
        )
    }
}

impl From<PresenceSnapshot> for PresenceDto {
    fn from(snapshot: PresenceSnapshot) -> Self {
        Self {
            room_id: snapshot.room_id.into_string(),
            users: snapshot.users.into_iter().map(UserId::into_string).collect(),
        }
    }
}
