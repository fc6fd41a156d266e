use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
    /// Validated against the closed role set, defaults to customer.
    pub role: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Query/body parameters of a verification link.
#[derive(Debug, Deserialize)]
pub struct VerifyEmailParams {
    pub id: Uuid,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

/// Response carrying the (password-hash-free) user plus a message.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub message: String,
    pub user: User,
}

/// `GET /user`: the user is null for anonymous sessions.
#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub user: Option<User>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_tolerates_missing_fields() {
        let parsed: RegisterRequest = serde_json::from_str("{}").unwrap();
        assert!(parsed.name.is_empty());
        assert!(parsed.role.is_none());
    }

    #[test]
    fn current_user_response_serializes_null_user() {
        let json = serde_json::to_string(&CurrentUserResponse { user: None }).unwrap();
        assert_eq!(json, r#"{"user":null}"#);
    }
}
