//! User account data models

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role, carried in access-token claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Moderator => "moderator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One external identity bound to a local account.
///
/// `(provider_type, provider_id)` is unique across all users. The provider's
/// own tokens are stored for later API calls but never serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    pub provider_id: String,
    pub provider_type: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub refresh_token: Option<String>,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub role: Role,
    pub is_email_verified: bool,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub login_count: i64,
    pub signup_source: Option<String>,
    pub providers: Vec<ProviderLink>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh active account with the standard role
    pub fn new(id: String, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: normalize_email(email),
            password_hash: None,
            first_name: None,
            last_name: None,
            display_name: None,
            profile_picture: None,
            role: Role::User,
            is_email_verified: false,
            is_active: true,
            last_login: None,
            login_count: 0,
            signup_source: None,
            providers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.providers.iter().any(|p| p.provider_type == provider_type)
    }

    pub fn provider(&self, provider_type: &str) -> Option<&ProviderLink> {
        self.providers.iter().find(|p| p.provider_type == provider_type)
    }

    /// Password (if set) plus each provider link
    pub fn login_method_count(&self) -> usize {
        usize::from(self.has_password()) + self.providers.len()
    }
}

/// Stored refresh token; one row per live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Narrowing for the account listing
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Case-insensitive substring of email or display name
    pub search: Option<String>,
    pub role: Option<Role>,
}

impl UserFilter {
    /// `LIKE` pattern for the search term, if there is one
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| format!("%{}%", term))
    }
}

/// Query for `GET /api/users/all`
#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
}

impl UserListQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    /// Fails on a role name outside the enumeration
    pub fn filter(&self) -> Result<UserFilter, String> {
        let role = match self.role.as_deref().filter(|r| !r.is_empty()) {
            Some(name) => Some(name.parse::<Role>()?),
            None => None,
        };
        Ok(UserFilter {
            search: self.search.clone(),
            role,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

/// Emails are the case-insensitive identity key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_list_query_bounds_and_filter() {
        let query = UserListQuery {
            limit: Some(1_000),
            skip: Some(-1),
            search: Some("  jane ".to_string()),
            role: Some("moderator".to_string()),
        };
        assert_eq!(query.limit(), UserListQuery::MAX_LIMIT);
        assert_eq!(query.skip(), 0);

        let filter = query.filter().unwrap();
        assert_eq!(filter.role, Some(Role::Moderator));
        assert_eq!(filter.search_pattern().as_deref(), Some("%jane%"));

        let blank = UserFilter {
            search: Some("   ".to_string()),
            role: None,
        };
        assert!(blank.search_pattern().is_none());

        let bad = UserListQuery {
            role: Some("root".to_string()),
            ..Default::default()
        };
        assert!(bad.filter().is_err());
    }

    fn link(provider_type: &str) -> ProviderLink {
        ProviderLink {
            provider_id: "42".to_string(),
            provider_type: provider_type.to_string(),
            email: None,
            display_name: None,
            profile_picture: None,
            access_token: Some("provider-secret".to_string()),
            refresh_token: None,
            linked_at: Utc::now(),
        }
    }

    #[test]
    fn test_login_method_count() {
        let mut user = User::new("U_1".to_string(), "A@B.com ");
        assert_eq!(user.email, "a@b.com");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.login_method_count(), 0);

        user.providers.push(link("google"));
        assert_eq!(user.login_method_count(), 1);
        assert!(user.has_provider("google"));
        assert!(!user.has_provider("facebook"));

        user.password_hash = Some("$argon2id$...".to_string());
        assert_eq!(user.login_method_count(), 2);
    }

    #[test]
    fn test_secrets_never_serialized() {
        let mut user = User::new("U_1".to_string(), "a@b.com");
        user.password_hash = Some("hash".to_string());
        user.providers.push(link("google"));

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json["providers"][0].get("accessToken").is_none());
        assert_eq!(json["providers"][0]["providerType"], "google");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Admin, Role::Moderator] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }
}
