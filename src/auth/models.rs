//! Request and response bodies for the auth routes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::validation::{check_password, is_valid_email};
use crate::common::{ValidationResult, Validator};
use crate::services::NewAccount;
use crate::users::ProviderLink;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<RegisterRequest> for NewAccount {
    fn from(req: RegisterRequest) -> Self {
        NewAccount {
            email: req.email,
            password: req.password,
            first_name: req.first_name.filter(|s| !s.trim().is_empty()),
            last_name: req.last_name.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthStartQuery {
    pub redirect_path: Option<String>,
}

/// Query string the provider redirects back with
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

impl LogsQuery {
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
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

/// Public view of a provider link
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedProvider {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub linked_at: DateTime<Utc>,
}

impl From<&ProviderLink> for LinkedProvider {
    fn from(link: &ProviderLink) -> Self {
        Self {
            provider_type: link.provider_type.clone(),
            email: link.email.clone(),
            display_name: link.display_name.clone(),
            linked_at: link.linked_at,
        }
    }
}

// ---- Validators ----

pub struct RegisterValidator;

impl Validator<RegisterRequest> for RegisterValidator {
    fn validate(&self, data: &RegisterRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        if !is_valid_email(&data.email) {
            result.add_error("email", "Please provide a valid email");
        }
        check_password(&mut result, "password", &data.password);
        for (field, value) in [("firstName", &data.first_name), ("lastName", &data.last_name)] {
            if value.as_ref().is_some_and(|v| v.chars().count() > 50) {
                result.add_error(field, "Must be at most 50 characters");
            }
        }
        result
    }
}

pub struct LoginValidator;

impl Validator<LoginRequest> for LoginValidator {
    fn validate(&self, data: &LoginRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        if !is_valid_email(&data.email) {
            result.add_error("email", "Please provide a valid email");
        }
        if data.password.is_empty() {
            result.add_error("password", "Password is required");
        }
        result
    }
}

pub struct SetPasswordValidator;

impl Validator<SetPasswordRequest> for SetPasswordValidator {
    fn validate(&self, data: &SetPasswordRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_password(&mut result, "password", &data.password);
        result
    }
}
