//! HTTP endpoints owned by the relay.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    domain::{PresenceError, RoomId, ValueObjectError},
    infrastructure::dto::http::{ErrorDto, HealthDto, PresenceDto},
    ui::state::AppState,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidRoom(#[from] ValueObjectError),

    #[error(transparent)]
    Presence(#[from] PresenceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::InvalidRoom(_) => (StatusCode::BAD_REQUEST, "invalid_room"),
            ApiError::Presence(e) => {
                tracing::error!("Presence read failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "presence_unavailable")
            }
        };
        let body = Json(ErrorDto {
            error,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok",
        instance_id: state.config.instance_id.to_string(),
    })
}

/// Current presence set of a room, across all instances.
pub async fn get_presence(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<PresenceDto>, ApiError> {
    let room_id = RoomId::new(room_id)?;
    let snapshot = state.presence.snapshot(&room_id).await?;
    Ok(Json(PresenceDto::from(snapshot)))
}
