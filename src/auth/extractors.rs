//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::cookies::{read_cookie, ACCESS_COOKIE};
use crate::common::{safe_email_log, ApiError, AppState, AuthError};
use crate::users::{Role, User};

/// Authenticated user extractor
///
/// Reads the access token from the `accessToken` cookie, falling back to an
/// `Authorization: Bearer` header, and loads the account it names. Expired
/// tokens are rejected with `TOKEN_EXPIRED` so clients can refresh silently.
#[derive(Debug)]
pub struct AuthedUser {
    pub user: User,
}

impl AuthedUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn require_role(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.user.role) {
            Ok(())
        } else {
            warn!(user_id = %self.user.id, role = %self.user.role, "Insufficient permissions");
            Err(ApiError::Forbidden("Insufficient permissions".into()))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let Some(token) = read_cookie(&parts.headers, ACCESS_COOKIE).or_else(|| bearer_token(parts))
        else {
            debug!("Authentication failed: no access token");
            return Err(ApiError::Unauthorized("Authentication required".into()));
        };

        let claims = app_state.sessions.verify_access(&token).map_err(|e| match e {
            AuthError::TokenExpired => ApiError::Auth(AuthError::TokenExpired),
            other => {
                warn!(error = %other, "Access token validation failed");
                ApiError::Auth(AuthError::TokenInvalid)
            }
        })?;

        let user = app_state.users.find_by_id(&claims.user_id).await?;

        match user {
            Some(user) if user.is_active => {
                debug!(
                    user_id = %user.id,
                    email = %safe_email_log(&user.email),
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser { user })
            }
            _ => {
                warn!(user_id = %claims.user_id, "Authentication failed: user not found or inactive");
                Err(ApiError::Unauthorized("User not found or inactive".into()))
            }
        }
    }
}
