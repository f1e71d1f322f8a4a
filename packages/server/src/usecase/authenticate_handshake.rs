//! UseCase: connection handshake admission.
//!
//! Checks run in a fixed order and each one alone can reject:
//!
//! 1. a present `Origin` header must be allowlisted
//! 2. a bearer credential must be found, in the `Sec-WebSocket-Protocol`
//!    value `jwt,<token>` first and the credential cookie second
//! 3. the token service must accept the credential (one call per handshake)
//! 4. the identity claims are extracted and attached to the connection
//!
//! A rejection creates no state anywhere.

use std::{collections::HashSet, sync::Arc};

use crate::domain::{Identity, RejectReason, TokenKind, TokenService, UserId};

/// Sub-protocol that carries the bearer token.
pub const CREDENTIAL_PROTOCOL: &str = "jwt";

/// Allowlist entry admitting every origin.
const ANY_ORIGIN: &str = "*";

/// Where a handshake may carry its credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSource {
    /// Token taken from the `jwt,<token>` sub-protocol value.
    pub protocol_token: Option<String>,
    /// Token taken from the credential cookie.
    pub cookie_token: Option<String>,
}

impl CredentialSource {
    /// Collect credential candidates from raw header values.
    pub fn from_headers(
        protocols: Option<&str>,
        cookies: Option<&str>,
        cookie_name: &str,
    ) -> Self {
        Self {
            protocol_token: protocols.and_then(protocol_token),
            cookie_token: cookies.and_then(|header| cookie_value(header, cookie_name)),
        }
    }

    /// The credential to validate, preferring the sub-protocol.
    pub fn bearer(&self) -> Option<&str> {
        self.protocol_token
            .as_deref()
            .or(self.cookie_token.as_deref())
    }
}

/// `jwt, <token>` -> `<token>`.
fn protocol_token(header: &str) -> Option<String> {
    let mut values = header.split(',').map(str::trim);
    if values.next()? != CREDENTIAL_PROTOCOL {
        return None;
    }
    values
        .next()
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct HandshakeAuthenticator {
    token_service: Arc<dyn TokenService>,
    allowed_origins: HashSet<String>,
}

impl HandshakeAuthenticator {
    pub fn new<I, S>(token_service: Arc<dyn TokenService>, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            token_service,
            allowed_origins: allowed_origins
                .into_iter()
                .map(|origin| normalize_origin(origin.as_ref()))
                .collect(),
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(ANY_ORIGIN)
            || self.allowed_origins.contains(&normalize_origin(origin))
    }

    /// Admit or reject one handshake.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as a [`RejectReason`].
    pub async fn authenticate(
        &self,
        origin: Option<&str>,
        credentials: &CredentialSource,
    ) -> Result<Identity, RejectReason> {
        let result = self.check(origin, credentials).await;
        if let Err(reason) = &result {
            tracing::warn!(
                reason = reason.code(),
                origin = origin.unwrap_or("-"),
                "Handshake rejected"
            );
        }
        result
    }

    async fn check(
        &self,
        origin: Option<&str>,
        credentials: &CredentialSource,
    ) -> Result<Identity, RejectReason> {
        if let Some(origin) = origin
            && !self.is_origin_allowed(origin)
        {
            return Err(RejectReason::OriginNotAllowed);
        }

        let token = credentials.bearer().ok_or(RejectReason::NoCredential)?;

        if !self.token_service.is_valid(token).await {
            return Err(RejectReason::InvalidCredential);
        }

        let claims = self
            .token_service
            .extract_claims(token)
            .map_err(|_| RejectReason::InvalidCredential)?;
        if claims.kind != TokenKind::Access {
            return Err(RejectReason::InvalidCredential);
        }

        Ok(Identity {
            user_id: claims.user_id.and_then(|id| UserId::new(id).ok()),
            email: claims.email,
        })
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
