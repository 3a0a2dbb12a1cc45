// src/users/handlers.rs

use axum::extract::{Extension, Json, Path, Query};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{Role, UpdateRoleRequest, UserListQuery};
use crate::auth::AuthedUser;
use crate::common::{ApiError, AppState};

/// GET /api/users/all?limit=&skip=&search=&role= - Account listing (admin only)
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.require_role(&[Role::Admin])?;

    let filter = query.filter().map_err(|e| {
        warn!(admin_user_id = %authed.id(), error = %e, "User listing rejected");
        ApiError::BadRequest("Invalid role".to_string())
    })?;
    let (limit, skip) = (query.limit(), query.skip());

    let users = state.users.list(&filter, limit, skip).await?;
    let total = state.users.count(&filter).await?;

    info!(
        admin_user_id = %authed.id(),
        user_count = users.len(),
        "User list fetched successfully"
    );

    Ok(Json(json!({
        "success": true,
        "data": {
            "users": users,
            "pagination": { "total": total, "limit": limit, "skip": skip }
        }
    })))
}

/// PATCH /api/users/:user_id/role - Change an account's role (admin only)
///
/// # Request Body
/// ```json
/// { "role": "user" | "admin" | "moderator" }
/// ```
pub async fn update_role_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.require_role(&[Role::Admin])?;

    let role: Role = request
        .role
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid role".to_string()))?;

    if !state.users.set_role(&user_id, role).await? {
        warn!(
            admin_user_id = %authed.id(),
            target_user_id = %user_id,
            "Role update failed: user not found"
        );
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let user = state
        .users
        .find_by_id(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    info!(
        admin_user_id = %authed.id(),
        target_user_id = %user.id,
        role = %role,
        "User role updated"
    );

    Ok(Json(json!({
        "success": true,
        "message": "User role updated successfully",
        "data": { "user": user }
    })))
}

/// GET /api/users/auth-events/:correlation_id - Every audit event of one flow (admin only)
pub async fn flow_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(correlation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authed.require_role(&[Role::Admin])?;

    let events = state.audit_store.list_by_correlation(&correlation_id).await?;

    info!(
        admin_user_id = %authed.id(),
        correlation_id = %correlation_id,
        event_count = events.len(),
        "Flow events fetched"
    );

    Ok(Json(json!({
        "success": true,
        "data": { "correlationId": correlation_id, "events": events }
    })))
}
