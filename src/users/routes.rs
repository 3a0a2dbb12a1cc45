// src/users/routes.rs

use axum::{
    routing::{get, patch},
    Router,
};

use super::handlers;

pub fn users_routes() -> Router {
    Router::new()
        // Admin account management
        .route("/api/users/all", get(handlers::list_users_handler))
        .route(
            "/api/users/:user_id/role",
            patch(handlers::update_role_handler),
        )
        .route(
            "/api/users/auth-events/:correlation_id",
            get(handlers::flow_events_handler),
        )
}
