//! Signed session tokens
//!
//! Access and refresh tokens are HS256 JWTs signed with the same secret and
//! told apart by the `type` claim. `verify` always checks that claim against
//! what the caller expects, so a refresh token can never authenticate an API
//! call and an access token can never be rotated.

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::common::{generate_token_id, AuthError};
use crate::users::{models::from_unix, Role, User};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Token payload. Refresh tokens omit `email` and `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(skip)]
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mint a fresh access/refresh pair for `user`
    pub fn issue(&self, user: &User) -> Result<TokenPair, AuthError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    pub(crate) fn issue_at(&self, user: &User, now: i64) -> Result<TokenPair, AuthError> {
        let access = Claims {
            user_id: user.id.clone(),
            email: Some(user.email.clone()),
            role: Some(user.role),
            token_type: TokenType::Access,
            jti: generate_token_id(),
            iat: now,
            exp: now + self.access_ttl.as_secs() as i64,
        };
        let refresh = Claims {
            user_id: user.id.clone(),
            email: None,
            role: None,
            token_type: TokenType::Refresh,
            jti: generate_token_id(),
            iat: now,
            exp: now + self.refresh_ttl.as_secs() as i64,
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            refresh_expires_at: from_unix(refresh.exp),
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {}", e)))
    }

    /// Verify signature, expiry and token type.
    ///
    /// Expiry is reported as `TokenExpired`; every other failure, including
    /// a type mismatch, is `TokenInvalid`.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => {
                    debug!(error = %e, "Token validation failed");
                    AuthError::TokenInvalid
                }
            }
        })?;

        if data.claims.token_type != expected {
            debug!(
                expected = ?expected,
                actual = ?data.claims.token_type,
                "Token type mismatch"
            );
            return Err(AuthError::TokenInvalid);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            "test-secret",
            Duration::from_secs(900),
            Duration::from_secs(604_800),
        )
    }

    fn user() -> User {
        User::new("U_TEST".to_string(), "a@b.com")
    }

    #[test]
    fn test_access_claims_carry_identity_and_role() {
        let tokens = service().issue(&user()).unwrap();
        let claims = service()
            .verify(&tokens.access_token, TokenType::Access)
            .unwrap();

        assert_eq!(claims.user_id, "U_TEST");
        assert_eq!(claims.email.as_deref(), Some("a@b.com"));
        assert_eq!(claims.role, Some(Role::User));
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_refresh_claims_are_minimal() {
        let service = service();
        let tokens = service.issue(&user()).unwrap();
        let claims = service
            .verify(&tokens.refresh_token, TokenType::Refresh)
            .unwrap();

        assert_eq!(claims.user_id, "U_TEST");
        assert!(claims.email.is_none());
        assert!(claims.role.is_none());
        assert_eq!(claims.exp - claims.iat, 604_800);
        assert_eq!(tokens.refresh_expires_at.timestamp(), claims.exp);
    }

    #[test]
    fn test_wire_claim_names() {
        let service = service();
        let tokens = service.issue(&user()).unwrap();
        let payload = tokens.access_token.split('.').nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_slice(
            &base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload)
                .unwrap(),
        )
        .unwrap();

        assert_eq!(json["userId"], "U_TEST");
        assert_eq!(json["type"], "access");
        assert_eq!(json["role"], "user");
        assert!(json["jti"].is_string());
    }

    #[test]
    fn test_type_confusion_rejected() {
        let service = service();
        let tokens = service.issue(&user()).unwrap();

        assert!(matches!(
            service.verify(&tokens.access_token, TokenType::Refresh),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            service.verify(&tokens.refresh_token, TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_expired_distinguished_from_invalid() {
        let service = service();
        let past = Utc::now().timestamp() - 1_000;
        let tokens = service.issue_at(&user(), past).unwrap();

        assert!(matches!(
            service.verify(&tokens.access_token, TokenType::Access),
            Err(AuthError::TokenExpired)
        ));

        let other = TokenService::new(
            "other-secret",
            Duration::from_secs(900),
            Duration::from_secs(900),
        );
        let foreign = other.issue(&user()).unwrap();
        assert!(matches!(
            service.verify(&foreign.access_token, TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            service.verify("not.a.jwt", TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_every_token_is_unique() {
        let service = service();
        let a = service.issue(&user()).unwrap();
        let b = service.issue(&user()).unwrap();
        assert_ne!(a.access_token, b.access_token);
        assert_ne!(a.refresh_token, b.refresh_token);
    }
}
