//! Inter-instance envelope DTO.

use serde::{Deserialize, Serialize};

/// JSON envelope published on a room channel:
/// `{type, content, userId, timestamp, instanceId}`.
///
/// `instanceId` is absent on envelopes written by older publishers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEnvelope {
    pub r#type: String,
    pub content: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}
