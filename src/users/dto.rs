use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password;
use crate::error::AppError;
use crate::users::repo_types::{Role, User, UserField, UserFilter};
use crate::validation::{is_valid_email, normalize_email};

/// User as exposed over the API: no hash, no tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub is_email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            role: u.role,
            is_email_verified: u.is_email_verified,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Body of `POST /api/users`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

fn check_name(label: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.chars().count() < 2 {
        return Err(AppError::Validation(format!(
            "{label} must be at least 2 characters"
        )));
    }
    Ok(value.to_string())
}

fn check_email(value: &str) -> Result<String, AppError> {
    let email = normalize_email(value);
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    Ok(email)
}

impl CreateUserRequest {
    pub fn validate(mut self) -> Result<Self, AppError> {
        self.first_name = check_name("First name", &self.first_name)?;
        self.last_name = check_name("Last name", &self.last_name)?;
        self.email = check_email(&self.email)?;
        if !password::is_acceptable(&self.password) {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                password::MIN_PASSWORD_LEN
            )));
        }
        Ok(self)
    }
}

/// Body of `PATCH /api/users/:id`. Passwords are not editable here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn validate(mut self) -> Result<Self, AppError> {
        self.first_name = self
            .first_name
            .map(|v| check_name("First name", &v))
            .transpose()?;
        self.last_name = self
            .last_name
            .map(|v| check_name("Last name", &v))
            .transpose()?;
        self.email = self.email.map(|v| check_email(&v)).transpose()?;
        Ok(self)
    }
}

/// Query of `GET /api/users`. Numbers stay strings so junk reads as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub desc: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

impl UserListQuery {
    pub fn filter(&self) -> Result<UserFilter, AppError> {
        let sort = match self.sort.as_deref().filter(|s| !s.is_empty()) {
            Some(key) => {
                let key = key
                    .parse::<UserField>()
                    .map_err(|_| AppError::Validation(format!("Unknown sort field: {key}")))?;
                let desc = matches!(self.desc.as_deref(), Some("true") | Some("1"));
                Some((key, desc))
            }
            None => None,
        };
        Ok(UserFilter {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            sort,
        })
    }
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
