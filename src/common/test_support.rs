//! Shared fixtures: an in-memory application and a mock OAuth provider

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{migrations::test_pool, AppConfig, AppState, AuthError};
use crate::oauth::providers::{require_provider_id, string_field, ProviderAdapter};
use crate::oauth::{CanonicalProfile, ProviderConfig, ProviderRegistry};

pub const ACME: &str = "acme-oauth";

/// Minimal provider pointed at a wiremock server
pub struct AcmeAdapter {
    config: ProviderConfig,
    client: Client,
}

impl AcmeAdapter {
    pub fn new(base_url: &str) -> Self {
        Self {
            config: ProviderConfig {
                name: ACME.to_string(),
                client_id: "acme-client".to_string(),
                client_secret: "acme-secret".to_string(),
                redirect_url: "http://localhost:8080/api/auth/acme-oauth/callback".to_string(),
                authorization_url: "https://acme.example/authorize".to_string(),
                token_url: format!("{}/token", base_url),
                profile_url: format!("{}/userinfo", base_url),
                scopes: vec!["openid".to_string(), "email".to_string()],
                grant_type: "authorization_code".to_string(),
            },
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AcmeAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn normalize(&self, raw: &Value) -> Result<CanonicalProfile, AuthError> {
        Ok(CanonicalProfile {
            provider_id: require_provider_id(raw, ACME)?,
            email: string_field(raw, "/email"),
            first_name: string_field(raw, "/given_name"),
            last_name: string_field(raw, "/family_name"),
            display_name: string_field(raw, "/name"),
            profile_picture: None,
            email_verified: raw
                .get("email_verified")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Answer the token exchange for `code` and the profile fetch that follows
pub async fn mount_acme(server: &MockServer, code: &str, profile: Value) {
    let access_token = format!("acme-at-{}", code);

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(format!("code={}", code)))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "refresh_token": "acme-rt",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", format!("Bearer {}", access_token)))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile))
        .mount(server)
        .await;
}

pub fn test_config() -> AppConfig {
    AppConfig {
        jwt_secret: "test-secret".to_string(),
        ..AppConfig::default()
    }
}

/// Fully wired state backed by an in-memory database
pub async fn test_state(server: &MockServer) -> Arc<AppState> {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(AcmeAdapter::new(&server.uri())));

    let (state, _audit_task) = AppState::new(test_config(), test_pool().await, providers);
    Arc::new(state)
}

/// The `state` query parameter of an authorization URL
pub fn state_from_auth_url(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
