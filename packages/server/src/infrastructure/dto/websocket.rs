//! WebSocket frame DTOs.

use serde::{Deserialize, Serialize};

/// Tag of the one control frame the relay itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlType {
    Presence,
}

/// Full member list of a room: `{"type":"presence","users":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub r#type: ControlType,
    pub users: Vec<String>,
}

impl PresenceMessage {
    pub fn new(users: Vec<String>) -> Self {
        Self {
            r#type: ControlType::Presence,
            users,
        }
    }
}

/// Structured edit event carried on the legacy path.
///
/// Only `roomId` is required; everything else is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorEventDto {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_message_wire_shape() {
        let message = PresenceMessage::new(vec!["alice".to_string(), "bob".to_string()]);

        let json = serde_json::to_string(&message).unwrap();

        assert_eq!(json, r#"{"type":"presence","users":["alice","bob"]}"#);
    }

    #[test]
    fn test_editor_event_requires_room_id_only() {
        let event: EditorEventDto = serde_json::from_str(r#"{"roomId":"r1"}"#).unwrap();
        assert_eq!(event.room_id, "r1");
        assert!(event.kind.is_none());

        let missing = serde_json::from_str::<EditorEventDto>(r#"{"type":"edit"}"#);
        assert!(missing.is_err());
    }
}
