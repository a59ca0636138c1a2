use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::password;
use crate::error::AppError;
use crate::users::repo_types::{Role, User};
use crate::validation::{is_valid_email, normalize_email};

/// Request body for self-registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

impl RegisterRequest {
    pub fn validate(mut self) -> Result<Self, AppError> {
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();
        self.email = normalize_email(&self.email);

        if self.first_name.is_empty() || self.last_name.is_empty() {
            return Err(AppError::Validation("First and last name are required".into()));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::Validation("Invalid email address".into()));
        }
        if !password::is_acceptable(&self.password) {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                password::MIN_PASSWORD_LEN
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: PublicUser,
}

/// Identity returned after login and by `/auth/me`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            role: u.role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}
