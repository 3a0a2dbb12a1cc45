//! Facebook (Graph API) OAuth2 adapter

use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{require_provider_id, string_field, CanonicalProfile, ProviderAdapter};
use crate::common::AuthError;
use crate::oauth::ProviderConfig;

/// Graph API returns only `id` and `name` unless fields are listed
const PROFILE_FIELDS: &str = "id,email,first_name,last_name,name,picture.type(large)";

pub struct FacebookAdapter {
    config: ProviderConfig,
    client: Client,
}

impl FacebookAdapter {
    pub fn new(config: ProviderConfig, client: Client) -> Self {
        Self { config, client }
    }
}

impl ProviderAdapter for FacebookAdapter {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn profile_request_url(&self) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.config.profile_url).map_err(|e| {
            AuthError::Internal(format!("invalid profile URL for facebook: {}", e))
        })?;
        url.query_pairs_mut().append_pair("fields", PROFILE_FIELDS);
        Ok(url)
    }

    fn normalize(&self, raw: &Value) -> Result<CanonicalProfile, AuthError> {
        Ok(CanonicalProfile {
            provider_id: require_provider_id(raw, "facebook")?,
            // absent when the user signed up with a phone number
            email: string_field(raw, "/email"),
            first_name: string_field(raw, "/first_name"),
            last_name: string_field(raw, "/last_name"),
            display_name: string_field(raw, "/name"),
            profile_picture: string_field(raw, "/picture/data/url"),
            email_verified: false,
        })
    }
}
