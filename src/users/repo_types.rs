use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    #[default]
    EcoCitizen,
    Merchant,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::EcoCitizen => "eco-citizen",
            Role::Merchant => "merchant",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "eco-citizen" => Ok(Role::EcoCitizen),
            "merchant" => Ok(Role::Merchant),
            "student" => Ok(Role::Student),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

/// User record as stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string
    pub role: Role,
    pub is_email_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Row shape of the `users` table; `role` is plain text there.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_email_verified: bool,
    pub verification_token: Option<String>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            is_email_verified: r.is_email_verified,
            verification_token: r.verification_token,
            reset_password_token: r.reset_password_token,
            reset_password_expires: r.reset_password_expires,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Insert payload handed to a backend; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_email_verified: bool,
    pub verification_token: Option<String>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub password_hash: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.role.is_none()
            && self.password_hash.is_none()
    }
}

/// Columns a listing can filter or sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    FirstName,
    LastName,
    Email,
    Role,
    CreatedAt,
}

impl UserField {
    /// Field name as it appears in the JSON projection.
    pub fn field(&self) -> &'static str {
        match self {
            UserField::FirstName => "firstName",
            UserField::LastName => "lastName",
            UserField::Email => "email",
            UserField::Role => "role",
            UserField::CreatedAt => "createdAt",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            UserField::FirstName => "first_name",
            UserField::LastName => "last_name",
            UserField::Email => "email",
            UserField::Role => "role",
            UserField::CreatedAt => "created_at",
        }
    }
}

impl FromStr for UserField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firstName" => Ok(UserField::FirstName),
            "lastName" => Ok(UserField::LastName),
            "email" => Ok(UserField::Email),
            "role" => Ok(UserField::Role),
            "createdAt" => Ok(UserField::CreatedAt),
            other => anyhow::bail!("unknown sort key {other:?}"),
        }
    }
}

/// Listing constraints: substring filters plus an optional single sort key.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub sort: Option<(UserField, bool)>,
}

impl UserFilter {
    /// `(field, needle)` pairs for every active filter.
    pub fn active(&self) -> Vec<(UserField, &str)> {
        [
            (UserField::FirstName, &self.first_name),
            (UserField::LastName, &self.last_name),
            (UserField::Email, &self.email),
            (UserField::Role, &self.role),
        ]
        .into_iter()
        .filter_map(|(field, v)| v.as_deref().filter(|s| !s.is_empty()).map(|s| (field, s)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        for role in [Role::Admin, Role::EcoCitizen, Role::Merchant, Role::Student] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(
                serde_json::to_value(role).unwrap(),
                serde_json::Value::String(role.to_string())
            );
        }
        assert!("merchat".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::EcoCitizen);
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Student,
            is_email_verified: false,
            verification_token: Some("vtok".into()),
            reset_password_token: Some("rtok".into()),
            reset_password_expires: Some(now),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("\"firstName\":\"Ada\""));
        assert!(json.contains("\"role\":\"student\""));
        assert!(!json.contains("argon2"));
        assert!(!json.contains("vtok"));
        assert!(!json.contains("rtok"));
    }

    #[test]
    fn filter_skips_empty_values() {
        let filter = UserFilter {
            email: Some("ex".into()),
            role: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(filter.active(), vec![(UserField::Email, "ex")]);
    }
}
