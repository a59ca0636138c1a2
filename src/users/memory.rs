use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::pagination::PageParams;
use crate::table::{self, ColumnFilter, SortSpec, TableQuery};
use crate::users::repo::{StoreError, StoreResult, UserStore};
use crate::users::repo_types::{NewUser, User, UserField, UserFilter, UserPatch};

/// Process-local backend. Each operation runs under one lock acquisition, so
/// the check-then-write sequences are atomic.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| u.email == email && Some(u.id) != except)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if email_taken(&users, &new.email, None) {
            return Err(StoreError::Conflict);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            is_email_verified: new.is_email_verified,
            verification_token: new.verification_token,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if let Some(email) = &patch.email {
            if email_taken(&users, email, Some(id)) {
                return Err(StoreError::Conflict);
            }
        }
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if patch.is_empty() {
            return Ok(user.clone());
        }
        if let Some(v) = patch.first_name {
            user.first_name = v;
        }
        if let Some(v) = patch.last_name {
            user.last_name = v;
        }
        if let Some(v) = patch.email {
            user.email = v;
        }
        if let Some(v) = patch.role {
            user.role = v;
        }
        if let Some(v) = patch.password_hash {
            user.password_hash = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<User> {
        self.users
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, filter: &UserFilter, page: PageParams) -> StoreResult<(Vec<User>, u64)> {
        let mut rows: Vec<User> = self.users.read().await.values().cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        // timestamps compare chronologically, not by their string form
        let sort = match filter.sort {
            None | Some((UserField::CreatedAt, false)) => None,
            Some((UserField::CreatedAt, true)) => {
                rows.reverse();
                None
            }
            Some((key, desc)) => Some(SortSpec {
                id: key.field().to_string(),
                desc,
            }),
        };
        let query = TableQuery {
            filters: filter
                .active()
                .into_iter()
                .map(|(field, value)| ColumnFilter {
                    id: field.field().to_string(),
                    value: value.to_string(),
                })
                .collect(),
            sort,
            page,
        };
        let page = table::apply(rows, &query).map_err(anyhow::Error::from)?;
        Ok((page.rows, page.total_rows))
    }

    async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users.values_mut().find(|u| u.email == email) else {
            return Ok(None);
        };
        user.reset_password_token = Some(token.to_string());
        user.reset_password_expires = Some(expires);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.reset_password_token.as_deref() == Some(token)
                    && u.reset_password_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| u.verification_token.as_deref() == Some(token))
        else {
            return Ok(None);
        };
        user.is_email_verified = true;
        user.verification_token = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users.values_mut().find(|u| {
            u.reset_password_token.as_deref() == Some(token)
                && u.reset_password_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        user.password_hash = password_hash.to_string();
        user.reset_password_token = None;
        user.reset_password_expires = None;
        user.verification_token = None;
        user.is_email_verified = true;
        user.updated_at = now;
        Ok(Some(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::users::repo_types::Role;

    fn new_user(email: &str, first: &str) -> NewUser {
        NewUser {
            first_name: first.into(),
            last_name: "Tester".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::Student,
            is_email_verified: false,
            verification_token: Some(format!("tok-{email}")),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "Alice")).await.unwrap();
        let err = store.create(new_user("a@x.com", "Eve")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_checks_email_against_other_records() {
        let store = MemoryUserStore::new();
        let a = store.create(new_user("a@x.com", "Alice")).await.unwrap();
        store.create(new_user("b@x.com", "Bob")).await.unwrap();

        let same = UserPatch { email: Some("a@x.com".into()), ..Default::default() };
        assert!(store.update(a.id, same).await.is_ok());

        let clash = UserPatch { email: Some("b@x.com".into()), ..Default::default() };
        assert!(matches!(store.update(a.id, clash).await, Err(StoreError::Conflict)));

        let missing = store.update(Uuid::new_v4(), UserPatch::default()).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn verification_token_is_single_use_under_contention() {
        let store = Arc::new(MemoryUserStore::new());
        store.create(new_user("a@x.com", "Alice")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.consume_verification_token("tok-a@x.com").await.unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(user.is_email_verified);
        assert!(user.verification_token.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reset_token_is_single_use_under_contention() {
        let store = Arc::new(MemoryUserStore::new());
        store.create(new_user("a@x.com", "Alice")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token("a@x.com", "reset", now + Duration::hours(1))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .consume_reset_token("reset", &format!("hash-{i}"), now)
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut winners = Vec::new();
        for h in handles {
            if let Some(user) = h.await.unwrap() {
                winners.push(user.password_hash);
            }
        }
        assert_eq!(winners.len(), 1);
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.password_hash, winners[0]);
        assert!(user.reset_password_token.is_none());
        assert!(store.find_by_reset_token("reset", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_reset_token_honours_expiry() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "Alice")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token("a@x.com", "reset", now + Duration::minutes(1))
            .await
            .unwrap();

        assert!(store.find_by_reset_token("reset", now).await.unwrap().is_some());
        assert!(store.find_by_reset_token("other", now).await.unwrap().is_none());
        let later = now + Duration::minutes(2);
        assert!(store.find_by_reset_token("reset", later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equal_sort_values_keep_creation_order() {
        let store = MemoryUserStore::new();
        for i in 0..3 {
            store
                .create(new_user(&format!("{i}@x.com"), "Same"))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.create(new_user("z@x.com", "Zed")).await.unwrap();

        let filter = UserFilter {
            sort: Some((UserField::FirstName, true)),
            ..Default::default()
        };
        let (rows, _) = store.list(&filter, PageParams::default()).await.unwrap();
        let emails: Vec<_> = rows.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["z@x.com", "0@x.com", "1@x.com", "2@x.com"]);
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let store = MemoryUserStore::new();
        store.create(new_user("a@x.com", "Alice")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token("a@x.com", "reset", now - Duration::seconds(1))
            .await
            .unwrap();

        assert!(store.consume_reset_token("reset", "new", now).await.unwrap().is_none());
        let user = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.password_hash, "hash");
    }

    #[tokio::test]
    async fn list_filters_sorts_and_counts() {
        let store = MemoryUserStore::new();
        for (i, name) in ["Carol", "alice", "Bob", "Dave"].iter().enumerate() {
            store
                .create(new_user(&format!("{i}@example.com"), name))
                .await
                .unwrap();
        }
        store.create(new_user("x@other.org", "Zed")).await.unwrap();

        let filter = UserFilter {
            email: Some("EXAMPLE".into()),
            sort: Some((UserField::FirstName, false)),
            ..Default::default()
        };
        let (rows, total) = store.list(&filter, PageParams::new(Some(1), Some(3))).await.unwrap();
        assert_eq!(total, 4);
        let names: Vec<_> = rows.iter().map(|u| u.first_name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Carol", "Dave"]);
    }
}
