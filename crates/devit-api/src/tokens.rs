use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use devit_types::api::Claims;

use crate::clock::Clock;

/// Token lifetimes. Refresh tokens outlive access tokens so a session can be renewed.
const ACCESS_TOKEN_TTL_DAYS: i64 = 7;
const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed or forged token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("token expired")]
    Expired,
}

/// Mints and checks HS256 session tokens. Expiry is judged against the
/// injected [`Clock`], not the system time, so it can be driven in tests.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            clock,
        }
    }

    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<String> {
        match kind {
            TokenKind::Access => {
                self.issue_with_ttl(user_id, Duration::days(ACCESS_TOKEN_TTL_DAYS), false)
            }
            TokenKind::Refresh => {
                self.issue_with_ttl(user_id, Duration::days(REFRESH_TOKEN_TTL_DAYS), true)
            }
        }
    }

    pub fn issue_with_ttl(&self, user_id: Uuid, ttl: Duration, refresh: bool) -> Result<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            refresh,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;

        if data.claims.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

/// Digest of a refresh token as stored on the user record.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
