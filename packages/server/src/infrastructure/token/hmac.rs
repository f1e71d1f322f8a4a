//! HS256 compact JWS tokens.
//!
//! Tokens are `base64url(header).base64url(payload).base64url(signature)`
//! with the payload claims `sub` (e-mail), `userId`, `type`
//! (`access` / `refresh`), `iat` and `exp` in Unix seconds.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tandem_shared::time::{Clock, SystemClock};

use crate::domain::{Claims, TokenError, TokenKind, TokenService};

type HmacSha256 = Hmac<Sha256>;

/// Shortest secret accepted for signing.
pub const MIN_SECRET_LENGTH: usize = 32;

pub const DEFAULT_ACCESS_LIFETIME: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    iat: i64,
    exp: i64,
}

pub struct HmacTokenService {
    secret: Vec<u8>,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HmacTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenService")
            .field("access_lifetime", &self.access_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

impl HmacTokenService {
    /// # Errors
    ///
    /// Rejects secrets shorter than [`MIN_SECRET_LENGTH`] bytes.
    pub fn new(
        secret: impl Into<Vec<u8>>,
        access_lifetime: Duration,
    ) -> Result<Self, TokenError> {
        Self::with_clock(secret, access_lifetime, Arc::new(SystemClock))
    }

    pub fn with_clock(
        secret: impl Into<Vec<u8>>,
        access_lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(TokenError::WeakSecret(secret.len()));
        }
        Ok(Self {
            secret,
            access_lifetime,
            refresh_lifetime: DEFAULT_REFRESH_LIFETIME,
            clock,
        })
    }

    /// Issue a refresh token. Refresh tokens are never accepted for a
    /// connection handshake.
    pub fn issue_refresh(&self, user_id: &str, email: &str) -> Result<String, TokenError> {
        self.sign_token(user_id, email, TokenKind::Refresh, self.refresh_lifetime)
    }

    fn now_secs(&self) -> i64 {
        self.clock.now_millis().div_euclid(1000)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn sign_token(
        &self,
        user_id: &str,
        email: &str,
        kind: TokenKind,
        lifetime: Duration,
    ) -> Result<String, TokenError> {
        let issued_at = self.now_secs();
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let payload = Payload {
            sub: Some(email.to_string()),
            user_id: Some(user_id.to_string()),
            kind: Some(kind.as_str().to_string()),
            iat: issued_at,
            exp: issued_at + lifetime.as_secs() as i64,
        };

        let signing_input = format!("{}.{}", encode_json(&header)?, encode_json(&payload)?);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify signature and expiry, then decode the payload.
    fn verify(&self, token: &str) -> Result<Payload, TokenError> {
        let token = token.trim();
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };
        let Some((header, payload)) = signing_input.split_once('.') else {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        };
        if payload.contains('.') {
            return Err(TokenError::Malformed("expected three segments".to_string()));
        }

        let header: Header = decode_json(header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed(format!(
                "unsupported alg {}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        // constant-time comparison
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload: Payload = decode_json(payload)?;
        if payload.exp <= self.now_secs() {
            return Err(TokenError::Expired);
        }
        Ok(payload)
    }
}

#[async_trait]
impl TokenService for HmacTokenService {
    fn issue(&self, user_id: &str, email: &str) -> Result<String, TokenError> {
        self.sign_token(user_id, email, TokenKind::Access, self.access_lifetime)
    }

    async fn is_valid(&self, token: &str) -> bool {
        match self.verify(token) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Token rejected: {}", e);
                false
            }
        }
    }

    fn extract_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let payload = self.verify(token)?;
        let kind = match payload.kind.as_deref() {
            Some("refresh") => TokenKind::Refresh,
            _ => TokenKind::Access,
        };
        Ok(Claims {
            user_id: payload.user_id,
            email: payload.sub,
            kind,
            issued_at: payload.iat,
            expires_at: payload.exp,
        })
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Encoding(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))
}
