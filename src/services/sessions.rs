//! Refresh-token sessions
//!
//! Each live session is one stored refresh token. Rotation is single-use:
//! the presented token must still be in the user's stored set, and removing
//! it and storing its replacement happen in one repository transaction.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::audit::{AuditLog, AuthAction, AuthEvent};
use super::tokens::{Claims, TokenPair, TokenService, TokenType};
use crate::common::{safe_token_log, AuthError, RequestMeta};
use crate::users::{RefreshTokenRecord, User, UserRepository};

pub struct SessionStore {
    repo: Arc<dyn UserRepository>,
    tokens: Arc<TokenService>,
    audit: AuditLog,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn UserRepository>, tokens: Arc<TokenService>, audit: AuditLog) -> Self {
        Self {
            repo,
            tokens,
            audit,
        }
    }

    /// Issue a token pair for `user` and persist its refresh token
    pub async fn start(&self, user: &User) -> Result<TokenPair, AuthError> {
        let pair = self.tokens.issue(user)?;
        self.repo
            .add_refresh_token(&user.id, &record_for(&pair))
            .await?;
        debug!(user_id = %user.id, "Session started");
        Ok(pair)
    }

    /// Exchange a stored refresh token for a new pair.
    ///
    /// A signature-valid token that has already been rotated or revoked fails
    /// with `InvalidRefreshToken`, as does any token that does not verify.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        meta: &RequestMeta,
    ) -> Result<TokenPair, AuthError> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenType::Refresh)
            .map_err(|_| AuthError::InvalidRefreshToken)?;

        let user = self
            .repo
            .find_by_id(&claims.user_id)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        let pair = self.tokens.issue(&user)?;
        let rotated = self
            .repo
            .rotate_refresh_token(&user.id, refresh_token, &record_for(&pair))
            .await?;

        if !rotated {
            info!(
                user_id = %user.id,
                token = %safe_token_log(refresh_token),
                "Rejected refresh token not in stored set"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        self.audit
            .record(AuthEvent::new(AuthAction::TokenRefresh).user(&user).meta(meta));

        Ok(pair)
    }

    /// Remove one refresh token. Returns `false` if it was not stored.
    pub async fn revoke(&self, user_id: &str, refresh_token: &str) -> Result<bool, AuthError> {
        self.repo.remove_refresh_token(user_id, refresh_token).await
    }

    /// Remove every refresh token the user holds
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let removed = self.repo.remove_all_refresh_tokens(user_id).await?;
        info!(user_id = %user_id, removed = removed, "Revoked all sessions");
        Ok(removed)
    }

    /// Verify an access token for an API call
    pub fn verify_access(&self, access_token: &str) -> Result<Claims, AuthError> {
        self.tokens.verify(access_token, TokenType::Access)
    }
}

#[cfg(test)]
impl SessionStore {
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }
}

fn record_for(pair: &TokenPair) -> RefreshTokenRecord {
    RefreshTokenRecord {
        token: pair.refresh_token.clone(),
        issued_at: Utc::now(),
        expires_at: pair.refresh_expires_at,
    }
}
