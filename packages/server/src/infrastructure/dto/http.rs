//! HTTP response DTOs.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDto {
    pub status: &'static str,
    pub instance_id: String,
}

/// Current presence set of a room, sorted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDto {
    pub room_id: String,
    pub users: Vec<String>,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDto {
    pub error: &'static str,
    pub message: String,
}
