//! Tests for auth module
//!
//! These drive the router end to end:
//! - Cookie and Bearer authentication, expired vs invalid tokens
//! - Refresh rotation and cookie clearing
//! - OAuth callback redirects
//! - Link management rules

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::common::test_support::{mount_acme, state_from_auth_url, test_state, ACME};
    use crate::common::AppState;
    use crate::users::User;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::{header, Request, Response, StatusCode},
        Router,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::MockServer;

    fn app(state: &Arc<AppState>) -> Router {
        auth_routes().layer(Extension(state.clone()))
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response<Body> {
        app(state).oneshot(request).await.unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_cookie(uri: &str, method: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookies(response: &Response<Body>) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    /// `name=value` pairs from Set-Cookie headers, ready for a Cookie header
    fn cookie_header(response: &Response<Body>) -> String {
        set_cookies(response)
            .iter()
            .filter_map(|c| c.split(';').next().map(str::to_string))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn location(response: &Response<Body>) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn register_and_login(state: &Arc<AppState>) -> String {
        let response = send(
            state,
            post_json(
                "/api/auth/register",
                json!({"email": "jane@example.com", "password": "correct horse", "firstName": "Jane"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(
            state,
            post_json(
                "/api/auth/login",
                json!({"email": "jane@example.com", "password": "correct horse"}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        cookie_header(&response)
    }

    #[tokio::test]
    async fn test_register_login_and_me() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;

        let cookies = register_and_login(&state).await;
        assert!(cookies.contains("accessToken="));
        assert!(cookies.contains("refreshToken="));

        let response = send(&state, with_cookie("/api/auth/me", "GET", &cookies)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["user"]["email"], "jane@example.com");
        assert!(body["data"]["user"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_login_sets_http_only_cookies() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        send(
            &state,
            post_json(
                "/api/auth/register",
                json!({"email": "a@b.com", "password": "correct horse"}),
            ),
        )
        .await;

        let response = send(
            &state,
            post_json("/api/auth/login", json!({"email": "a@b.com", "password": "correct horse"})),
        )
        .await;
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("Path=/")));
        assert!(cookies[0].contains("Max-Age=900"));
        assert!(cookies[1].contains("Max-Age=604800"));
    }

    #[tokio::test]
    async fn test_register_validation_and_duplicates() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;

        let response = send(
            &state,
            post_json("/api/auth/register", json!({"email": "bad", "password": "short"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "VALIDATION_ERROR");

        let body = json!({"email": "a@b.com", "password": "correct horse"});
        send(&state, post_json("/api/auth/register", body.clone())).await;
        let response = send(&state, post_json("/api/auth/register", body)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], "EMAIL_ALREADY_REGISTERED");
    }

    #[tokio::test]
    async fn test_bearer_header_accepted() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let user = User::new("U_BEARER".to_string(), "bearer@b.com");
        state.users.create(&user).await.unwrap();
        let pair = state.sessions.tokens().issue(&user).unwrap();

        let request = Request::get("/api/auth/me")
            .header(header::AUTHORIZATION, format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&state, request).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_expired_and_invalid_tokens_distinguished() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let user = User::new("U_EXPIRED".to_string(), "old@b.com");
        state.users.create(&user).await.unwrap();

        let stale = state
            .sessions
            .tokens()
            .issue_at(&user, Utc::now().timestamp() - 3600)
            .unwrap();
        let response = send(
            &state,
            with_cookie(
                "/api/auth/me",
                "GET",
                &format!("accessToken={}", stale.access_token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "TOKEN_EXPIRED");

        let response = send(
            &state,
            with_cookie("/api/auth/me", "GET", "accessToken=not.a.jwt"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "TOKEN_INVALID");

        // a refresh token is not an access token
        let fresh = state.sessions.tokens().issue(&user).unwrap();
        let response = send(
            &state,
            with_cookie(
                "/api/auth/me",
                "GET",
                &format!("accessToken={}", fresh.refresh_token),
            ),
        )
        .await;
        assert_eq!(json_body(response).await["code"], "TOKEN_INVALID");

        let response = send(&state, Request::get("/api/auth/me").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_inactive_user_rejected() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let mut user = User::new("U_OFF".to_string(), "off@b.com");
        user.is_active = false;
        state.users.create(&user).await.unwrap();
        let pair = state.sessions.tokens().issue(&user).unwrap();

        let response = send(
            &state,
            with_cookie(
                "/api/auth/me",
                "GET",
                &format!("accessToken={}", pair.access_token),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_clears_on_failure() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let cookies = register_and_login(&state).await;

        let response = send(&state, Request::post("/api/auth/refresh").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&state, with_cookie("/api/auth/refresh", "POST", &cookies)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let rotated = cookie_header(&response);
        assert_ne!(rotated, cookies);

        // the old refresh token was consumed by the rotation
        let response = send(&state, with_cookie("/api/auth/refresh", "POST", &cookies)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cleared = set_cookies(&response);
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
        assert_eq!(json_body(response).await["code"], "INVALID_REFRESH_TOKEN");
    }

    #[tokio::test]
    async fn test_logout_revokes_refresh_token() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let cookies = register_and_login(&state).await;

        let response = send(&state, with_cookie("/api/auth/logout", "POST", &cookies)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).iter().all(|c| c.contains("Max-Age=0")));

        let response = send(&state, with_cookie("/api/auth/refresh", "POST", &cookies)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_error_redirects() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let base = &state.config.client_url;

        let cases = [
            (
                "/api/auth/acme-oauth/callback?error=access_denied&error_description=User%20denied",
                "User%20denied",
            ),
            (
                "/api/auth/acme-oauth/callback?error=access_denied",
                "access_denied",
            ),
            (
                "/api/auth/acme-oauth/callback?code=abc",
                "Missing%20authorization%20code%20or%20state",
            ),
            (
                "/api/auth/acme-oauth/callback?code=abc&state=raw-token",
                "Invalid%20state%20parameter",
            ),
            (
                "/api/auth/acme-oauth/callback?code=abc&state=%7B%22state%22%3A%22gone%22%7D",
                "Invalid%20or%20expired%20session",
            ),
        ];

        for (uri, message) in cases {
            let response = send(&state, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::FOUND, "{}", uri);
            assert_eq!(
                location(&response),
                format!("{}/auth/error?error={}", base, message)
            );
        }
    }

    #[tokio::test]
    async fn test_oauth_login_over_http() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        mount_acme(
            &server,
            "http-code",
            json!({"id": "acme-1", "email": "oauth@acme.test", "name": "OAuth User"}),
        )
        .await;

        let response = send(
            &state,
            Request::get("/api/auth/oauth/acme-oauth?redirectPath=/settings/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let auth_url = json_body(response).await["data"]["authUrl"]
            .as_str()
            .unwrap()
            .to_string();
        let raw_state = state_from_auth_url(&auth_url);

        let callback = format!(
            "/api/auth/acme-oauth/callback?code=http-code&state={}",
            urlencoding::encode(&raw_state)
        );
        let response = send(&state, Request::get(callback.as_str()).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("{}/settings/profile", state.config.client_url));
        let cookies = cookie_header(&response);
        assert!(cookies.contains("accessToken="));

        // providers listing never exposes provider tokens
        let response = send(&state, with_cookie("/api/auth/providers", "GET", &cookies)).await;
        let body = json_body(response).await;
        let providers = body["data"]["providers"].as_array().unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0]["type"], ACME);
        assert!(providers[0].get("accessToken").is_none());
        assert!(providers[0].get("refreshToken").is_none());

        // the only login method cannot be removed
        let response = send(
            &state,
            with_cookie("/api/auth/unlink/acme-oauth", "DELETE", &cookies),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "LAST_AUTH_METHOD");

        // after setting a password it can
        let request = Request::post("/api/auth/password")
            .header(header::COOKIE, &cookies)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"password": "now-a-password"}).to_string()))
            .unwrap();
        assert_eq!(send(&state, request).await.status(), StatusCode::OK);

        let response = send(
            &state,
            with_cookie("/api/auth/unlink/acme-oauth", "DELETE", &cookies),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["user"]["providers"], json!([]));
    }

    #[tokio::test]
    async fn test_link_start_rejects_already_linked() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let cookies = register_and_login(&state).await;

        let response = send(
            &state,
            with_cookie("/api/auth/link/acme-oauth", "POST", &cookies),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&state, with_cookie("/api/auth/link/unknown", "POST", &cookies)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "UNKNOWN_PROVIDER");
    }

    #[tokio::test]
    async fn test_logs_are_paginated_newest_first() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let cookies = register_and_login(&state).await;
        state.audit.flush().await;

        let response = send(
            &state,
            with_cookie("/api/auth/logs?limit=1", "GET", &cookies),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["pagination"]["total"], 2);
        let logs = body["data"]["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["action"], "login");
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let response = send(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "healthy");
    }

    #[tokio::test]
    async fn test_health_reports_unusable_database() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        state.db.close().await;

        let response = send(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"], "error");
    }
}
