//! Authentication routes

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/register` - Local account signup
/// - `POST /api/auth/login` - Local login, sets session cookies
/// - `POST /api/auth/logout` - Revoke the current session
/// - `POST /api/auth/logout-all` - Revoke every session
/// - `POST /api/auth/refresh` - Rotate the refresh cookie
/// - `GET /api/auth/me` - Current user
/// - `GET /api/auth/oauth/:provider` - Begin a provider login
/// - `GET /api/auth/:provider/callback` - Provider redirect target
/// - `POST /api/auth/link/:provider` - Begin linking a provider
/// - `DELETE /api/auth/unlink/:provider` - Remove a provider link
/// - `POST /api/auth/password` - Set a local password
/// - `GET /api/auth/providers` - Linked providers
/// - `GET /api/auth/logs` - Authentication history
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/logout-all", post(handlers::logout_all_handler))
        .route("/api/auth/refresh", post(handlers::refresh_handler))
        .route("/api/auth/me", get(handlers::me_handler))
        .route("/api/auth/oauth/:provider", get(handlers::oauth_start_handler))
        .route(
            "/api/auth/:provider/callback",
            get(handlers::oauth_callback_handler),
        )
        .route("/api/auth/link/:provider", post(handlers::link_start_handler))
        .route("/api/auth/unlink/:provider", delete(handlers::unlink_handler))
        .route("/api/auth/password", post(handlers::set_password_handler))
        .route("/api/auth/providers", get(handlers::providers_handler))
        .route("/api/auth/logs", get(handlers::logs_handler))
        .route("/health", get(handlers::health_handler))
        .route("/api/health", get(handlers::health_handler))
}
