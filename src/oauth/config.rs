//! OAuth provider configuration and authorization URL building

use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

use crate::common::AuthError;

/// Built-in endpoint defaults for a provider, overridable from the environment
#[derive(Debug)]
pub struct ProviderDefaults {
    pub name: &'static str,
    pub env_prefix: &'static str,
    /// Alternate env var names for client id / secret (Facebook calls them app id / secret)
    pub client_id_alias: Option<&'static str>,
    pub client_secret_alias: Option<&'static str>,
    pub authorization_url: &'static str,
    pub token_url: &'static str,
    pub profile_url: &'static str,
    pub scopes: &'static [&'static str],
}

pub const GOOGLE: ProviderDefaults = ProviderDefaults {
    name: "google",
    env_prefix: "GOOGLE",
    client_id_alias: None,
    client_secret_alias: None,
    authorization_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    profile_url: "https://www.googleapis.com/oauth2/v2/userinfo",
    scopes: &["profile", "email"],
};

pub const FACEBOOK: ProviderDefaults = ProviderDefaults {
    name: "facebook",
    env_prefix: "FACEBOOK",
    client_id_alias: Some("FACEBOOK_APP_ID"),
    client_secret_alias: Some("FACEBOOK_APP_SECRET"),
    authorization_url: "https://www.facebook.com/v18.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
    profile_url: "https://graph.facebook.com/me",
    scopes: &["email", "public_profile"],
};

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub authorization_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub scopes: Vec<String>,
    pub grant_type: String,
}

impl ProviderConfig {
    /// Build a config with the provider's default endpoints
    pub fn with_defaults(
        defaults: &ProviderDefaults,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            name: defaults.name.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            authorization_url: defaults.authorization_url.to_string(),
            token_url: defaults.token_url.to_string(),
            profile_url: defaults.profile_url.to_string(),
            scopes: defaults.scopes.iter().map(|s| s.to_string()).collect(),
            grant_type: "authorization_code".to_string(),
        }
    }

    /// Load a provider from `{PREFIX}_*` variables. Returns `None` when no client id is set.
    pub fn from_env(defaults: &ProviderDefaults) -> Option<Self> {
        let var = |suffix: &str| env::var(format!("{}_{}", defaults.env_prefix, suffix)).ok();

        let client_id = var("CLIENT_ID")
            .or_else(|| defaults.client_id_alias.and_then(|k| env::var(k).ok()))
            .filter(|v| !v.is_empty())?;
        let client_secret = var("CLIENT_SECRET")
            .or_else(|| defaults.client_secret_alias.and_then(|k| env::var(k).ok()))
            .unwrap_or_default();
        let redirect_url = var("CALLBACK_URL").unwrap_or_else(|| {
            format!(
                "http://localhost:8080/api/auth/{}/callback",
                defaults.name
            )
        });

        let mut config = Self::with_defaults(defaults, client_id, client_secret, redirect_url);

        if let Some(url) = var("AUTHORIZATION_URL") {
            config.authorization_url = url;
        }
        if let Some(url) = var("TOKEN_URL") {
            config.token_url = url;
        }
        if let Some(url) = var("USERINFO_URL") {
            config.profile_url = url;
        }
        if let Some(scopes) = var("SCOPES") {
            config.scopes = scopes
                .split([',', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Some(config)
    }

    /// Build the PKCE-bound authorization redirect URL.
    ///
    /// `state` is the already-serialized [`StateParam`] JSON.
    pub fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.authorization_url).map_err(|e| {
            AuthError::Internal(format!("invalid authorization URL for {}: {}", self.name, e))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_url)
                .append_pair("response_type", "code")
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state)
                .append_pair("code_challenge", code_challenge)
                .append_pair("code_challenge_method", "S256");
            for (key, value) in extra_params {
                query.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }
}

/// The `state` query parameter: the opaque token plus post-login routing intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateParam {
    pub state: String,
    #[serde(rename = "redirectPath", default, skip_serializing_if = "Option::is_none")]
    pub redirect_path: Option<String>,
}

impl StateParam {
    pub fn encode(&self) -> Result<String, AuthError> {
        serde_json::to_string(self).map_err(|e| AuthError::Internal(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        serde_json::from_str(raw).map_err(|_| AuthError::MalformedState)
    }
}
