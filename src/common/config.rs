// src/common/config.rs
//! Process configuration loaded from environment variables

use std::env;
use std::time::Duration;
use tracing::warn;

use crate::oauth::config::{FACEBOOK, GOOGLE};
use crate::oauth::ProviderConfig;

const DEFAULT_JWT_SECRET: &str = "replace_with_strong_secret";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Base URL of the browser client; OAuth callbacks redirect here
    pub client_url: String,
    pub secure_cookies: bool,
    pub oauth_state_ttl: Duration,
    pub oauth_sweep_interval: Duration,
    pub provider_timeout: Duration,
    pub audit_queue_capacity: usize,
    pub cors_origins: Vec<String>,
    pub sentry_dsn: Option<String>,
    pub providers: Vec<ProviderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://auth_api.db".to_string(),
            port: 8080,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            client_url: "http://localhost:3000".to_string(),
            secure_cookies: false,
            oauth_state_ttl: Duration::from_secs(10 * 60),
            oauth_sweep_interval: Duration::from_secs(10 * 60),
            provider_timeout: Duration::from_secs(10),
            audit_queue_capacity: 1024,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            sentry_dsn: None,
            providers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(port) = parse_env::<u16>("PORT") {
            config.port = port;
        }

        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => warn!("JWT_SECRET not set, using insecure development secret"),
        }

        if let Some(secs) = parse_env::<u64>("JWT_ACCESS_TTL_SECS") {
            config.access_token_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("JWT_REFRESH_TTL_SECS") {
            config.refresh_token_ttl = Duration::from_secs(secs);
        }

        if let Ok(url) = env::var("CLIENT_URL") {
            config.client_url = url.trim_end_matches('/').to_string();
        }

        // APP_ENV wins over NODE_ENV so existing deployments keep working
        let environment = env::var("APP_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .unwrap_or_default();
        config.secure_cookies = environment.eq_ignore_ascii_case("production");

        if let Some(secs) = parse_env::<u64>("OAUTH_STATE_TTL_SECS") {
            config.oauth_state_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("OAUTH_SWEEP_INTERVAL_SECS") {
            config.oauth_sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_env::<u64>("PROVIDER_HTTP_TIMEOUT_SECS") {
            config.provider_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(capacity) = parse_env::<usize>("AUDIT_QUEUE_CAPACITY") {
            config.audit_queue_capacity = capacity.max(1);
        }

        if let Ok(origins) = env::var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.sentry_dsn = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty());

        config.providers = [ProviderConfig::from_env(&GOOGLE), ProviderConfig::from_env(&FACEBOOK)]
            .into_iter()
            .flatten()
            .collect();

        config
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}
