//! Account lifecycle: registration, login, refresh-token rotation, logout,
//! password change and password reset.
//!
//! Every method is synchronous and may spend tens of milliseconds inside
//! Argon2, so HTTP handlers call them through [`crate::run_blocking`].
//!
//! Each credential write is a single conditional update in the store (see
//! [`UserRepository`]): a stale refresh token, a stale password hash or an
//! already-redeemed reset code loses the race instead of overwriting.

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use devit_db::{UserRepository, is_constraint_violation};
use devit_types::api::{StatusMessage, TokenResponse};
use devit_types::models::User;

use crate::clock::Clock;
use crate::credentials::CredentialStore;
use crate::error::{ApiError, BAD_CREDENTIALS, INVALID_TOKEN};
use crate::tokens::{TokenIssuer, TokenKind, token_digest};

pub const RESET_REQUESTED: &str = "If the email exists, a reset code has been sent.";
const RESET_CODE_TTL_HOURS: i64 = 1;
const INVALID_RESET: &str = "Invalid email or reset code";

pub struct AuthSessionService {
    users: Arc<dyn UserRepository>,
    credentials: CredentialStore,
    tokens: TokenIssuer,
    clock: Arc<dyn Clock>,
}

impl AuthSessionService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        credentials: CredentialStore,
        tokens: TokenIssuer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            credentials,
            tokens,
            clock,
        }
    }

    pub fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<TokenResponse, ApiError> {
        if self.users.find_by_username(username)?.is_some() {
            return Err(ApiError::Conflict("Username already exists".into()));
        }
        if self.users.find_by_email(email)?.is_some() {
            return Err(ApiError::Conflict("Email already in use".into()));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: self.credentials.hash(password)?,
            karma: 0,
            bio: Some(String::new()),
            reset_code: None,
            reset_code_expiry: None,
            refresh_token_hash: None,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.users.insert_user(&user) {
            if is_constraint_violation(&e) {
                return Err(ApiError::Conflict("Username or email already in use".into()));
            }
            return Err(e.into());
        }

        info!(user_id = %user.id, "user registered");
        self.start_session(&user)
    }

    /// `identifier` is an email if it contains `@`, otherwise a username.
    /// Unknown account and wrong password produce the same error.
    pub fn login(&self, identifier: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let user = if identifier.contains('@') {
            self.users.find_by_email(identifier)?
        } else {
            self.users.find_by_username(identifier)?
        };

        let Some(user) = user else {
            self.credentials.verify_dummy(password);
            return Err(ApiError::Unauthenticated(BAD_CREDENTIALS));
        };
        if !self.credentials.verify(password, &user.password_hash) {
            warn!(user_id = %user.id, "login rejected");
            return Err(ApiError::Unauthenticated(BAD_CREDENTIALS));
        }

        info!(user_id = %user.id, "user logged in");
        self.start_session(&user)
    }

    pub fn logout(&self, user_id: Uuid) -> Result<StatusMessage, ApiError> {
        self.users.set_refresh_token_hash(user_id, None)?;
        info!(%user_id, "user logged out");
        Ok(StatusMessage::new("Successfully logged out"))
    }

    /// Exchange a refresh token for a fresh pair. The presented token must be
    /// the one whose digest is stored on the account; it is replaced by the
    /// new one, so each refresh token is usable once.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let claims = self.tokens.verify(refresh_token).map_err(|e| {
            warn!("refresh token rejected: {}", e);
            ApiError::Unauthenticated(INVALID_TOKEN)
        })?;
        if !claims.refresh {
            return Err(ApiError::Unauthenticated(INVALID_TOKEN));
        }

        let user = self
            .users
            .find_by_id(claims.sub)?
            .ok_or(ApiError::Unauthenticated(INVALID_TOKEN))?;

        let presented = token_digest(refresh_token);
        if user.refresh_token_hash.as_deref() != Some(presented.as_str()) {
            warn!(user_id = %user.id, "revoked or superseded refresh token presented");
            return Err(ApiError::Unauthenticated(INVALID_TOKEN));
        }

        let (response, digest) = self.mint_pair(&user)?;
        if !self.users.swap_refresh_token_hash(user.id, &presented, &digest)? {
            warn!(user_id = %user.id, "refresh lost a race with logout or another refresh");
            return Err(ApiError::Unauthenticated(INVALID_TOKEN));
        }

        Ok(response)
    }

    pub fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<StatusMessage, ApiError> {
        let user = self
            .users
            .find_by_id(user_id)?
            .ok_or(ApiError::Unauthenticated(INVALID_TOKEN))?;

        if !self.credentials.verify(current, &user.password_hash) {
            return Err(ApiError::Unauthenticated("Current password is incorrect"));
        }

        let new_hash = self.credentials.hash(new)?;
        if !self.users.swap_password_hash(user.id, &user.password_hash, &new_hash)? {
            return Err(ApiError::Unauthenticated("Current password is incorrect"));
        }

        info!(%user_id, "password changed");
        Ok(StatusMessage::new("Password changed successfully"))
    }

    /// Always answers with the same message. A code is only generated and
    /// stored when the email belongs to an account.
    pub fn request_password_reset(&self, email: &str) -> Result<StatusMessage, ApiError> {
        if let Some(user) = self.users.find_by_email(email)? {
            let code = rand::rng().random_range(100_000..=999_999u32).to_string();
            let expiry = self.clock.now() + Duration::hours(RESET_CODE_TTL_HOURS);
            self.users.set_reset_code(user.id, &code, expiry)?;
            info!(user_id = %user.id, "password reset code issued");
        }

        Ok(StatusMessage::new(RESET_REQUESTED))
    }

    pub fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<StatusMessage, ApiError> {
        let user = self
            .users
            .find_by_email(email)?
            .ok_or_else(|| ApiError::InvalidArgument(INVALID_RESET.into()))?;

        let (Some(pending), Some(expiry)) = (&user.reset_code, user.reset_code_expiry) else {
            return Err(ApiError::InvalidArgument(
                "No reset code requested or it has expired".into(),
            ));
        };
        if pending != code {
            return Err(ApiError::InvalidArgument("Invalid reset code".into()));
        }
        if self.clock.now() > expiry {
            return Err(ApiError::InvalidArgument("Reset code has expired".into()));
        }

        let new_hash = self.credentials.hash(new_password)?;
        if !self.users.consume_reset_code(user.id, code, &new_hash)? {
            return Err(ApiError::InvalidArgument(INVALID_RESET.into()));
        }

        info!(user_id = %user.id, "password reset completed");
        Ok(StatusMessage::new("Password has been reset successfully"))
    }

    /// Resolve an access token to its account. Refresh tokens are refused
    /// here, and so are tokens for accounts that no longer exist.
    pub fn get_current_user(&self, token: &str) -> Result<User, ApiError> {
        let claims = self
            .tokens
            .verify(token)
            .map_err(|_| ApiError::Unauthenticated(INVALID_TOKEN))?;
        if claims.refresh {
            return Err(ApiError::Unauthenticated(INVALID_TOKEN));
        }

        self.users
            .find_by_id(claims.sub)?
            .ok_or(ApiError::Unauthenticated(INVALID_TOKEN))
    }

    /// Issue a pair and make its refresh token the only valid one.
    fn start_session(&self, user: &User) -> Result<TokenResponse, ApiError> {
        let (response, digest) = self.mint_pair(user)?;
        self.users.set_refresh_token_hash(user.id, Some(&digest))?;
        Ok(response)
    }

    fn mint_pair(&self, user: &User) -> Result<(TokenResponse, String), ApiError> {
        let access_token = self.tokens.issue(user.id, TokenKind::Access)?;
        let refresh_token = self.tokens.issue(user.id, TokenKind::Refresh)?;
        let digest = token_digest(&refresh_token);

        Ok((
            TokenResponse {
                access_token,
                token_type: "bearer",
                user_id: user.id,
                username: user.username.clone(),
                refresh_token,
            },
            digest,
        ))
    }
}
