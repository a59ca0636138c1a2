use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password::hash_password_async;
use crate::pagination::PageParams;
use crate::users::memory::MemoryUserStore;
use crate::users::repo::{StoreResult, UserStore};
use crate::users::repo_types::{NewUser, Role, User, UserFilter, UserPatch};

/// New account with a plaintext password.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub is_email_verified: bool,
    pub verification_token: Option<String>,
}

/// Field changes; `password` is plaintext and hashed before the write.
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

/// Handle to the user store that every request handler goes through.
/// Plaintext passwords never reach the backend.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<dyn UserStore>,
}

impl CredentialStore {
    pub fn new(inner: Arc<dyn UserStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryUserStore::new()))
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.find_by_email(email).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.find_by_id(id).await
    }

    pub async fn create(&self, account: NewAccount) -> StoreResult<User> {
        let password_hash = hash_password_async(account.password).await?;
        self.inner
            .create(NewUser {
                first_name: account.first_name,
                last_name: account.last_name,
                email: account.email,
                password_hash,
                role: account.role,
                is_email_verified: account.is_email_verified,
                verification_token: account.verification_token,
            })
            .await
    }

    pub async fn update(&self, id: Uuid, changes: AccountChanges) -> StoreResult<User> {
        let password_hash = match changes.password {
            Some(plain) => Some(hash_password_async(plain).await?),
            None => None,
        };
        self.inner
            .update(
                id,
                UserPatch {
                    first_name: changes.first_name,
                    last_name: changes.last_name,
                    email: changes.email,
                    role: changes.role,
                    password_hash,
                },
            )
            .await
    }

    pub async fn delete(&self, id: Uuid) -> StoreResult<User> {
        self.inner.delete(id).await
    }

    pub async fn list(&self, filter: &UserFilter, page: PageParams) -> StoreResult<(Vec<User>, u64)> {
        self.inner.list(filter, page).await
    }

    pub async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        self.inner.set_reset_token(email, token, expires).await
    }

    pub async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>> {
        self.inner.consume_verification_token(token).await
    }

    /// `None` when the token is unknown, already used or expired.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: String,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        // skip the hash for tokens that cannot succeed; the consume below
        // still decides the race
        if self.inner.find_by_reset_token(token, now).await?.is_none() {
            return Ok(None);
        }
        let password_hash = hash_password_async(new_password).await?;
        self.inner
            .consume_reset_token(token, &password_hash, now)
            .await
    }
}
