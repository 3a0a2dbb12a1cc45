//! Authentication handlers

use axum::{
    extract::{Extension, Json, Path, Query},
    http::{
        header::{HeaderName, LOCATION, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{AppendHeaders, IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::cookies::{cleared_cookies, read_cookie, session_cookies, REFRESH_COOKIE};
use super::extractors::AuthedUser;
use super::models::{
    AuthUrlResponse, CallbackQuery, LinkedProvider, LoginRequest, LoginValidator, LogsQuery,
    OAuthStartQuery, RegisterRequest, RegisterValidator, SetPasswordRequest, SetPasswordValidator,
};
use crate::common::{ApiError, AppState, AuthError, RequestMeta, Validator};
use crate::services::OAuthOutcome;

type CookieHeaders = AppendHeaders<[(HeaderName, String); 2]>;

fn set_cookies(values: [String; 2]) -> CookieHeaders {
    AppendHeaders(values.map(|v| (SET_COOKIE, v)))
}

/// 302 to `location`; the callback contract is a plain `Found`
fn found(location: String) -> (StatusCode, [(HeaderName, String); 1]) {
    (StatusCode::FOUND, [(LOCATION, location)])
}

fn error_redirect(client_url: &str, message: &str) -> Response {
    found(format!(
        "{}/auth/error?error={}",
        client_url,
        urlencoding::encode(message)
    ))
    .into_response()
}

/// POST /api/auth/register
///
/// # Request Body
/// ```json
/// { "email": "...", "password": "...", "firstName": "...", "lastName": "..." }
/// ```
pub async fn register_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    RegisterValidator.validate(&payload).into_result()?;

    let meta = RequestMeta::from_headers(&headers);
    let user = state.auth.register(payload.into(), &meta).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "data": { "user": user }
        })),
    ))
}

/// POST /api/auth/login
/// Verifies credentials and sets both session cookies
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieHeaders, Json<serde_json::Value>), ApiError> {
    LoginValidator.validate(&payload).into_result()?;

    let meta = RequestMeta::from_headers(&headers);
    let session = state
        .auth
        .login(&payload.email, &payload.password, &meta)
        .await?;

    Ok((
        set_cookies(session_cookies(&session.tokens, &state.config)),
        Json(json!({
            "success": true,
            "message": "Login successful",
            "data": { "user": session.user }
        })),
    ))
}

/// POST /api/auth/logout
/// Revokes the presented refresh token and clears the cookies
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    headers: HeaderMap,
) -> Result<(CookieHeaders, Json<serde_json::Value>), ApiError> {
    let meta = RequestMeta::from_headers(&headers);
    let refresh_token = read_cookie(&headers, REFRESH_COOKIE);
    state
        .auth
        .logout(authed.id(), refresh_token.as_deref(), &meta)
        .await?;

    Ok((
        set_cookies(cleared_cookies(&state.config)),
        Json(json!({
            "success": true,
            "message": "Logout successful"
        })),
    ))
}

/// POST /api/auth/logout-all
/// Revokes every session the user holds
pub async fn logout_all_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    headers: HeaderMap,
) -> Result<(CookieHeaders, Json<serde_json::Value>), ApiError> {
    let meta = RequestMeta::from_headers(&headers);
    let revoked = state.auth.logout_all(authed.id(), &meta).await?;

    Ok((
        set_cookies(cleared_cookies(&state.config)),
        Json(json!({
            "success": true,
            "message": "Logged out of all sessions",
            "data": { "revoked": revoked }
        })),
    ))
}

/// POST /api/auth/refresh
/// Rotates the `refreshToken` cookie. Any failure clears both cookies.
pub async fn refresh_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(refresh_token) = read_cookie(&headers, REFRESH_COOKIE) else {
        return ApiError::Unauthorized("Refresh token not found".into()).into_response();
    };

    let meta = RequestMeta::from_headers(&headers);
    match state.auth.refresh(&refresh_token, &meta).await {
        Ok(tokens) => (
            set_cookies(session_cookies(&tokens, &state.config)),
            Json(json!({
                "success": true,
                "message": "Token refreshed successfully"
            })),
        )
            .into_response(),
        Err(e) => {
            info!(error = %e, "Refresh rejected");
            (set_cookies(cleared_cookies(&state.config)), ApiError::from(e)).into_response()
        }
    }
}

/// GET /api/auth/me
pub async fn me_handler(authed: AuthedUser) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": { "user": authed.user }
    }))
}

/// GET /api/auth/oauth/:provider?redirectPath=
/// Starts a login flow and returns the provider authorization URL
pub async fn oauth_start_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthStartQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth_url = state
        .auth
        .begin_oauth(&provider, query.redirect_path.as_deref(), None)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": AuthUrlResponse { auth_url }
    })))
}

/// GET /api/auth/:provider/callback
///
/// Always answers with a 302: to `{CLIENT_URL}{redirectPath}` on success,
/// to `{CLIENT_URL}/auth/error?error=...` otherwise.
pub async fn oauth_callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let client_url = state.config.client_url.as_str();

    if let Some(error) = params.error.as_deref() {
        warn!(provider = %provider, oauth_error = %error, "Provider returned an error");
        let message = params.error_description.as_deref().unwrap_or(error);
        return error_redirect(client_url, message);
    }

    let (Some(code), Some(raw_state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return error_redirect(client_url, "Missing authorization code or state");
    };

    let meta = RequestMeta::from_headers(&headers);
    match state
        .auth
        .complete_oauth(&provider, code, raw_state, &meta)
        .await
    {
        Ok(outcome) => {
            let location = format!("{}{}", client_url, outcome.redirect_path());
            match outcome {
                OAuthOutcome::SignedIn { session, .. } => (
                    set_cookies(session_cookies(&session.tokens, &state.config)),
                    found(location),
                )
                    .into_response(),
                OAuthOutcome::Linked { user, .. } => {
                    info!(user_id = %user.id, provider = %provider, "Provider linked from callback");
                    found(location).into_response()
                }
            }
        }
        Err(e) => {
            let message = match e {
                AuthError::Storage(_) | AuthError::PasswordHash(_) | AuthError::Internal(_) => {
                    "Authentication failed".to_string()
                }
                other => other.to_string(),
            };
            error_redirect(client_url, &message)
        }
    }
}

/// POST /api/auth/link/:provider
/// Starts a flow that attaches the provider to the current account
pub async fn link_start_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    Query(query): Query<OAuthStartQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth_url = state
        .auth
        .begin_oauth(&provider, query.redirect_path.as_deref(), Some(&authed.user))
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": AuthUrlResponse { auth_url }
    })))
}

/// DELETE /api/auth/unlink/:provider
pub async fn unlink_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let meta = RequestMeta::from_headers(&headers);
    let user = state.auth.unlink(authed.id(), &provider, &meta).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} account unlinked successfully", provider),
        "data": { "user": user }
    })))
}

/// POST /api/auth/password
/// Adds (or replaces) the local password credential
pub async fn set_password_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Json(payload): Json<SetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    SetPasswordValidator.validate(&payload).into_result()?;

    let user = state.auth.set_password(authed.id(), &payload.password).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password set successfully",
        "data": { "user": user }
    })))
}

/// GET /api/auth/providers
pub async fn providers_handler(authed: AuthedUser) -> Json<serde_json::Value> {
    let providers: Vec<LinkedProvider> =
        authed.user.providers.iter().map(LinkedProvider::from).collect();

    Json(json!({
        "success": true,
        "data": { "providers": providers }
    }))
}

/// GET /api/auth/logs?limit=&skip=
/// The current user's authentication history, newest first
pub async fn logs_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (limit, skip) = (query.limit(), query.skip());
    let logs = state
        .audit_store
        .list_for_user(authed.id(), limit, skip)
        .await?;
    let total = state.audit_store.count_for_user(authed.id()).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "logs": logs,
            "pagination": { "total": total, "limit": limit, "skip": skip }
        }
    })))
}

/// GET /health
/// Liveness plus a database round-trip; 503 when the pool is unusable
pub async fn health_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let (status, database) = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "degraded" },
            "database": database,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
