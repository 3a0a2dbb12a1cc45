//! Session cookies
//!
//! Both tokens travel as `HttpOnly; SameSite=Lax; Path=/` cookies. `Secure`
//! is added when the process runs in production.

use axum::http::{header::COOKIE, HeaderMap};
use std::time::Duration;

use crate::common::AppConfig;
use crate::services::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name,
        value,
        max_age.as_secs(),
        if secure { "; Secure" } else { "" }
    )
}

/// `Set-Cookie` values for a freshly issued pair
pub fn session_cookies(tokens: &TokenPair, config: &AppConfig) -> [String; 2] {
    [
        cookie(
            ACCESS_COOKIE,
            &tokens.access_token,
            config.access_token_ttl,
            config.secure_cookies,
        ),
        cookie(
            REFRESH_COOKIE,
            &tokens.refresh_token,
            config.refresh_token_ttl,
            config.secure_cookies,
        ),
    ]
}

/// `Set-Cookie` values that expire both session cookies
pub fn cleared_cookies(config: &AppConfig) -> [String; 2] {
    [
        cookie(ACCESS_COOKIE, "", Duration::ZERO, config.secure_cookies),
        cookie(REFRESH_COOKIE, "", Duration::ZERO, config.secure_cookies),
    ]
}

/// Value of cookie `name` from any `Cookie` header on the request
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn pair() -> TokenPair {
        TokenPair {
            access_token: "AT".to_string(),
            refresh_token: "RT".to_string(),
            refresh_expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_session_cookie_attributes() {
        let config = AppConfig::default();
        let [access, refresh] = session_cookies(&pair(), &config);
        assert_eq!(
            access,
            "accessToken=AT; Path=/; HttpOnly; SameSite=Lax; Max-Age=900"
        );
        assert_eq!(
            refresh,
            "refreshToken=RT; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800"
        );
    }

    #[test]
    fn test_secure_flag_in_production() {
        let config = AppConfig {
            secure_cookies: true,
            ..AppConfig::default()
        };
        let [access, _] = session_cookies(&pair(), &config);
        assert!(access.ends_with("; Secure"));

        let [cleared, _] = cleared_cookies(&config);
        assert!(cleared.starts_with("accessToken=; Path=/;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; accessToken=abc.def"));
        headers.append(COOKIE, HeaderValue::from_static("refreshToken=xyz"));

        assert_eq!(read_cookie(&headers, ACCESS_COOKIE).as_deref(), Some("abc.def"));
        assert_eq!(read_cookie(&headers, REFRESH_COOKIE).as_deref(), Some("xyz"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }
}
