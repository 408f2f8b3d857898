// Authentication types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, SessionError};

/// Access + refresh token issued together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Cached profile snapshot; a read-through copy of server state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Backend ids arrive as numbers or strings depending on the endpoint
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Tokens plus profile returned by login/register
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub tokens: TokenPair,
    pub user: UserProfile,
}

impl AuthSession {
    /// Split a login/register response body into credentials and profile.
    ///
    /// The backend sends token fields and profile fields in one flat object;
    /// a nested `user` object is accepted as well.
    pub fn from_response(body: Value) -> Result<Self> {
        let access_token = body.get("accessToken").and_then(Value::as_str);
        let refresh_token = body.get("refreshToken").and_then(Value::as_str);

        let (access_token, refresh_token) = match (access_token, refresh_token) {
            (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => (a.to_string(), r.to_string()),
            _ => {
                return Err(SessionError::InvalidResponse(
                    "Invalid response from server".to_string(),
                ))
            }
        };

        let profile_value = match body.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => body,
        };
        let user: UserProfile = serde_json::from_value(profile_value).map_err(|e| {
            SessionError::InvalidResponse(format!("User profile missing from response: {}", e))
        })?;

        Ok(Self {
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
            user,
        })
    }
}

/// Login request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember_me: None,
        }
    }
}

/// Refresh endpoint response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Logout request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Account role chosen at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Organizer,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches("ROLE_").to_uppercase().as_str() {
            "CUSTOMER" => Some(Role::Customer),
            "ORGANIZER" => Some(Role::Organizer),
            _ => None,
        }
    }
}

/// Step 1 of the registration form: account
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountStep {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Step 2 of the registration form: contact and role
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContactStep {
    pub phone: String,
    pub role: String,
}

/// Step 3 of the registration form: optional referral
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReferralStep {
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Multi-step registration form as collected by the UI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    pub step1: RegisterAccountStep,
    pub step2: RegisterContactStep,
    #[serde(default)]
    pub step3: RegisterReferralStep,
}

/// Normalized registration body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub role: Role,
}

impl RegisterForm {
    /// Flatten the steps into the request body and the optional referral code.
    ///
    /// Only structural checks happen here; field policies belong to the UI.
    pub fn into_request(self) -> Result<(RegisterRequest, Option<String>)> {
        let RegisterForm { step1, step2, step3 } = self;

        let required = [
            ("fullName", step1.full_name.trim()),
            ("email", step1.email.trim()),
            ("password", step1.password.as_str()),
            ("phone", step2.phone.trim()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(SessionError::Validation(format!("{} is required", field)));
        }

        if step1.password != step1.confirm_password {
            return Err(SessionError::Validation("Passwords don't match".to_string()));
        }

        let role = Role::parse(&step2.role)
            .ok_or_else(|| SessionError::Validation(format!("Unknown role: {}", step2.role)))?;

        let referral_code = step3
            .referral_code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty());

        Ok((
            RegisterRequest {
                full_name: step1.full_name.trim().to_string(),
                email: step1.email.trim().to_string(),
                password: step1.password,
                phone: step2.phone.trim().to_string(),
                role,
            },
            referral_code,
        ))
    }
}

/// Reactive session state published to UI collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    /// Set when the session ended because refresh failed
    pub expired: bool,
}

impl SessionState {
    pub fn loading() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: true,
            expired: false,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            is_loading: false,
            ..Self::loading()
        }
    }

    pub fn signed_in(user: UserProfile) -> Self {
        Self {
            user: Some(user),
            is_authenticated: true,
            is_loading: false,
            expired: false,
        }
    }

    pub fn expired() -> Self {
        Self {
            expired: true,
            ..Self::signed_out()
        }
    }
}
