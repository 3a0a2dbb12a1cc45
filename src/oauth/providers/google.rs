//! Google OAuth2/OIDC adapter

use reqwest::Client;
use serde_json::Value;

use super::{require_provider_id, string_field, CanonicalProfile, ProviderAdapter};
use crate::common::AuthError;
use crate::oauth::ProviderConfig;

pub struct GoogleAdapter {
    config: ProviderConfig,
    client: Client,
}

impl GoogleAdapter {
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self { config, client }
    }
}

impl ProviderAdapter for GoogleAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn client(&self) -> &Client {
        &self.client
    }

    /// Request a provider refresh token on every consent
    fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        &[("access_type", "offline"), ("prompt", "consent")]
    }

    fn normalize(&self, raw: &Value) -> Result<CanonicalProfile, AuthError> {
        Ok(CanonicalProfile {
            provider_id: require_provider_id(raw, "google")?,
            email: string_field(raw, "/email"),
            first_name: string_field(raw, "/given_name"),
            last_name: string_field(raw, "/family_name"),
            display_name: string_field(raw, "/name"),
            profile_picture: string_field(raw, "/picture"),
            email_verified: raw
                .get("verified_email")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::config::GOOGLE;
    use serde_json::json;

    fn adapter() -> GoogleAdapter {
        GoogleAdapter::new(
            ProviderConfig::with_defaults(&GOOGLE, "c", "s", "http://localhost/cb"),
            Client::new(),
        )
    }

    #[test]
    fn test_normalize_userinfo() {
        let profile = adapter()
            .normalize(&json!({
                "id": "1080",
                "email": "jane@example.com",
                "verified_email": true,
                "name": "Jane Doe",
                "given_name": "Jane",
                "family_name": "Doe",
                "picture": "https://lh3.googleusercontent.com/a/photo"
            }))
            .unwrap();

        assert_eq!(profile.provider_id, "1080");
        assert_eq!(profile.first_name.as_deref(), Some("Jane"));
        assert_eq!(profile.last_name.as_deref(), Some("Doe"));
        assert_eq!(profile.display_name.as_deref(), Some("Jane Doe"));
        assert!(profile.email_verified);
    }

    #[test]
    fn test_missing_id_rejected() {
        let err = adapter().normalize(&json!({"email": "x@y.com"})).unwrap_err();
        assert!(matches!(err, AuthError::ProviderProfile(_)));
    }

    #[test]
    fn test_authorization_url_requests_offline_access() {
        let url = adapter().authorization_url("{}", "challenge").unwrap();
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("code_challenge_method=S256"));
    }
}
