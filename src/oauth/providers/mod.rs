//! OAuth provider adapters
//!
//! Every provider implements [`ProviderAdapter`]: the code exchange and the
//! profile fetch are shared defaults driven by [`ProviderConfig`], and each
//! adapter supplies its own field mapping in `normalize`. The
//! [`ProviderRegistry`] maps provider names to adapters.

pub mod facebook;
pub mod google;

pub use facebook::FacebookAdapter;
pub use google::GoogleAdapter;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::config::ProviderConfig;
use crate::common::AuthError;

/// Tokens returned by the provider's token endpoint. Provider-scoped and
/// never used as this service's own session tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Provider-independent view of a user profile
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalProfile {
    pub provider_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub email_verified: bool,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn client(&self) -> &Client;

    /// Map the provider's raw profile JSON into the canonical shape
    fn normalize(&self, raw: &Value) -> Result<CanonicalProfile, AuthError>;

    fn name(&self) -> &str {
        &self.config().name
    }

    /// Provider-specific authorization query parameters
    fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// URL the profile is fetched from, including any required query parameters
    fn profile_request_url(&self) -> Result<Url, AuthError> {
        Url::parse(&self.config().profile_url).map_err(|e| {
            AuthError::Internal(format!("invalid profile URL for {}: {}", self.name(), e))
        })
    }

    fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, AuthError> {
        self.config()
            .authorization_url(state, code_challenge, self.extra_authorize_params())
    }

    /// PKCE-bound authorization-code exchange
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<ProviderTokens, AuthError> {
        let config = self.config();
        let params = [
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri.unwrap_or(&config.redirect_url)),
            ("grant_type", config.grant_type.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .client()
            .post(&config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.name(), error = %e, "Token exchange request failed");
                AuthError::ProviderExchange(e.to_string())
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::ProviderExchange(e.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let description = error_description(&body).unwrap_or_else(|| status.to_string());
            warn!(provider = %self.name(), status = %status, "Token exchange rejected");
            return Err(AuthError::ProviderExchange(description));
        }

        serde_json::from_value::<ProviderTokens>(body)
            .map_err(|e| AuthError::ProviderExchange(format!("malformed token response: {}", e)))
    }

    /// Fetch the raw profile with the provider access token
    async fn fetch_profile(&self, access_token: &str) -> Result<Value, AuthError> {
        let url = self.profile_request_url()?;

        let response = self
            .client()
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.name(), error = %e, "Profile request failed");
                AuthError::ProviderProfile(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let description = error_description(&body).unwrap_or_else(|| status.to_string());
            return Err(AuthError::ProviderProfile(description));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ProviderProfile(format!("malformed profile response: {}", e)))
    }

    /// Fetch and normalize in one step
    async fn fetch_canonical_profile(
        &self,
        access_token: &str,
    ) -> Result<CanonicalProfile, AuthError> {
        let raw = self.fetch_profile(access_token).await?;
        self.normalize(&raw)
    }
}

/// OAuth2 errors come as `error_description`, a bare `error` string, or
/// (Graph API) an `error.message` object.
fn error_description(body: &Value) -> Option<String> {
    body.get("error_description")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .map(str::to_string)
}

/// Non-empty string field; numeric ids are stringified
pub(crate) fn string_field(raw: &Value, pointer: &str) -> Option<String> {
    match raw.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn require_provider_id(raw: &Value, provider: &str) -> Result<String, AuthError> {
    string_field(raw, "/id").ok_or_else(|| {
        AuthError::ProviderProfile(format!("{} profile is missing an id", provider))
    })
}

type AdapterFactory = fn(ProviderConfig, Client) -> Arc<dyn ProviderAdapter>;

/// Adapters available to [`ProviderRegistry::from_configs`]
const BUILTIN_ADAPTERS: &[(&str, AdapterFactory)] =
    &[("google", build_google), ("facebook", build_facebook)];

fn build_google(config: ProviderConfig, client: Client) -> Arc<dyn ProviderAdapter> {
    Arc::new(GoogleAdapter::new(config, client))
}

fn build_facebook(config: ProviderConfig, client: Client) -> Arc<dyn ProviderAdapter> {
    Arc::new(FacebookAdapter::new(config, client))
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider that has a built-in mapping
    pub fn from_configs(configs: &[ProviderConfig], client: Client) -> Self {
        let mut registry = Self::new();
        for config in configs {
            match BUILTIN_ADAPTERS.iter().find(|(name, _)| *name == config.name) {
                Some((_, factory)) => {
                    registry.register(factory(config.clone(), client.clone()));
                    info!(provider = %config.name, "OAuth provider registered");
                }
                None => warn!(provider = %config.name, "No adapter for configured provider"),
            }
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, AuthError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
