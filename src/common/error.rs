// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

use super::validation::ValidationResult;

/// Domain errors raised by the authentication core.
///
/// Callers match on these to decide how to react: `TokenExpired` triggers a
/// silent refresh on the client, the link/unlink variants render specific UI,
/// everything else is a hard failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid or expired session")]
    InvalidState,

    #[error("Provider mismatch")]
    ProviderMismatch,

    #[error("Failed to exchange code for token: {0}")]
    ProviderExchange(String),

    #[error("Failed to fetch user profile: {0}")]
    ProviderProfile(String),

    #[error("{0} account already linked")]
    AlreadyLinkedSelf(String),

    #[error("This account is already linked to another user")]
    AlreadyLinkedOther,

    #[error("Cannot unlink last authentication method. Please set a password first.")]
    LastAuthMethod,

    #[error("{0} account not linked")]
    ProviderNotLinked(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Account is inactive")]
    UserInactive,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("User not found")]
    UserNotFound,

    #[error("Unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid state parameter")]
    MalformedState,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidState => "INVALID_STATE",
            AuthError::ProviderMismatch => "PROVIDER_MISMATCH",
            AuthError::ProviderExchange(_) => "PROVIDER_EXCHANGE_ERROR",
            AuthError::ProviderProfile(_) => "PROVIDER_PROFILE_ERROR",
            AuthError::AlreadyLinkedSelf(_) => "ALREADY_LINKED",
            AuthError::AlreadyLinkedOther => "ALREADY_LINKED_OTHER",
            AuthError::LastAuthMethod => "LAST_AUTH_METHOD",
            AuthError::ProviderNotLinked(_) => "PROVIDER_NOT_LINKED",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::UserInactive => "USER_INACTIVE",
            AuthError::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            AuthError::MalformedState => "MALFORMED_STATE",
            AuthError::PasswordHash(_) => "INTERNAL_SERVER_ERROR",
            AuthError::Storage(_) => "DATABASE_ERROR",
            AuthError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::TokenExpired
            | AuthError::TokenInvalid
            | AuthError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            AuthError::UserInactive => StatusCode::FORBIDDEN,
            AuthError::AlreadyLinkedSelf(_)
            | AuthError::AlreadyLinkedOther
            | AuthError::EmailAlreadyRegistered => StatusCode::CONFLICT,
            AuthError::InvalidState
            | AuthError::ProviderMismatch
            | AuthError::LastAuthMethod
            | AuthError::ProviderNotLinked(_)
            | AuthError::UnknownProvider(_)
            | AuthError::MalformedState => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::ProviderExchange(_) | AuthError::ProviderProfile(_) => {
                StatusCode::BAD_GATEWAY
            }
            AuthError::PasswordHash(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    InternalServer(String),
    DatabaseError(sqlx::Error),
    ValidationError(String),
    Auth(AuthError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::Auth(e) => write!(f, "Auth Error: {}", e),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_message, code) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED"),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, "FORBIDDEN"),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            ApiError::InternalServer(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg,
                "INTERNAL_SERVER_ERROR",
            ),
            ApiError::DatabaseError(e) => {
                error!(error = %e, "Database error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database operation failed".to_string(),
                    "DATABASE_ERROR",
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, "VALIDATION_ERROR"),
            ApiError::Auth(e) => {
                let status = e.status();
                let message = match &e {
                    AuthError::Storage(inner) => {
                        error!(error = %inner, "Database error occurred");
                        "Database operation failed".to_string()
                    }
                    AuthError::PasswordHash(_) | AuthError::Internal(_) => {
                        error!(error = %e, "Internal authentication error");
                        "Internal server error".to_string()
                    }
                    _ => e.to_string(),
                };
                (status, message, e.code())
            }
        };

        let error_response = ErrorResponse {
            error: error_message,
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Storage(e) => ApiError::DatabaseError(e),
            other => ApiError::Auth(other),
        }
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            let error_messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            ApiError::ValidationError(error_messages.join(", "))
        }
    }
}
