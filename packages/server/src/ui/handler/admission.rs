//! Admission: client keys, rate limiting and the rejection responses.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    domain::{ClientKey, EndpointClass, RejectReason, ValueObjectError},
    infrastructure::dto::http::ErrorDto,
    ui::state::AppState,
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Why a request or handshake was turned away.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error(transparent)]
    InvalidRoom(#[from] ValueObjectError),
}

impl AdmissionError {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::Rejected(reason) => reason.code(),
            AdmissionError::InvalidRoom(_) => "invalid_room",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::Rejected(RejectReason::OriginNotAllowed) => StatusCode::FORBIDDEN,
            AdmissionError::Rejected(_) => StatusCode::UNAUTHORIZED,
            AdmissionError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorDto {
            error: self.code(),
            message: self.to_string(),
        });

        match self {
            AdmissionError::RateLimited { retry_after } => {
                let mut response = (status, body).into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs(retry_after)),
                );
                response
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Whole seconds to wait, rounded up and never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Derive the rate-limit key of a request.
///
/// Forwarding headers are only honoured when `trust_forwarded_for` is set;
/// otherwise any client could pick its own bucket.
pub fn client_key(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> ClientKey {
    if trust_forwarded_for && let Some(ip) = forwarded_ip(headers) {
        return ClientKey::new(ip);
    }
    ClientKey::new(peer.ip())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_forwarded_for = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .find_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
        });

    from_forwarded_for.or_else(|| {
        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    })
}

/// Middleware consulting the rate governor before any handler runs.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    let key = client_key(request.headers(), peer, state.config.trust_forwarded_for);
    let class = EndpointClass::classify(request.method().as_str(), request.uri().path());

    if let Err(retry_after) = state.governor.check(key, class) {
        tracing::warn!(
            reason = "rate_limited",
            client = %key,
            class = %class,
            path = request.uri().path(),
            "Request rejected"
        );
        return Err(AdmissionError::RateLimited { retry_after });
    }

    Ok(next.run(request).await)
}
