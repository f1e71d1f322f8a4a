//! Token service port.
//!
//! Issuing and verifying bearer credentials is owned by an external
//! collaborator. The relay only needs the three capabilities below.

use async_trait::async_trait;

use super::error::TokenError;

/// What a token is meant to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Identity claims carried by a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// `userId` claim.
    pub user_id: Option<String>,
    /// `sub` claim (the e-mail address).
    pub email: Option<String>,
    pub kind: TokenKind,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Issue an access token for the given user.
    fn issue(&self, user_id: &str, email: &str) -> Result<String, TokenError>;

    /// Whether the token is currently valid: signature verifies and it has
    /// not expired.
    async fn is_valid(&self, token: &str) -> bool;

    /// Extract the identity claims of a token.
    fn extract_claims(&self, token: &str) -> Result<Claims, TokenError>;
}
