use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::pagination::PageParams;
use crate::users::repo_types::{NewUser, User, UserField, UserFilter, UserPatch, UserRow};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    Conflict,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Other(anyhow::Error::new(e)),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence backend for user records.
///
/// The `consume_*` methods are single conditional writes: of two concurrent
/// calls presenting the same token, at most one gets `Some`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Fails with `Conflict` when the email is taken.
    async fn create(&self, new: NewUser) -> StoreResult<User>;
    /// Fails with `Conflict` when the new email belongs to another record.
    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User>;
    async fn delete(&self, id: Uuid) -> StoreResult<User>;
    /// Page of matching records plus the count of all matches.
    async fn list(&self, filter: &UserFilter, page: PageParams) -> StoreResult<(Vec<User>, u64)>;
    async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    /// Holder of a reset token that has not expired at `now`.
    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    /// Marks the holder verified and clears the token.
    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>>;
    /// Swaps in the new hash if the token matches and `expires > now`.
    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, password_hash, role, \
     is_email_verified, verification_token, reset_password_token, reset_password_expires, \
     created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_user(row: Option<UserRow>) -> StoreResult<Option<User>> {
    Ok(row.map(User::try_from).transpose()?)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    let mut first = true;
    for (field, needle) in filter.active() {
        qb.push(if first { " WHERE " } else { " AND " });
        first = false;
        qb.push(format!("strpos(lower({}), lower(", field.column()));
        qb.push_bind(needle.to_string());
        qb.push(")) > 0");
    }
}

/// Text columns sort bytewise and ties keep creation order, matching the
/// in-memory backend.
fn order_by(sort: Option<(UserField, bool)>) -> String {
    match sort {
        None => "created_at ASC, id ASC".into(),
        Some((UserField::CreatedAt, desc)) => {
            let dir = if desc { "DESC" } else { "ASC" };
            format!("created_at {dir}, id {dir}")
        }
        Some((key, desc)) => {
            let dir = if desc { "DESC" } else { "ASC" };
            format!("{} COLLATE \"C\" {dir}, created_at ASC, id ASC", key.column())
        }
    }
}

fn consume_verification_sql() -> String {
    format!(
        r#"
        UPDATE users
           SET is_email_verified = TRUE, verification_token = NULL, updated_at = now()
         WHERE verification_token = $1
        RETURNING {USER_COLUMNS}
        "#
    )
}

/// `$1` token, `$2` new hash, `$3` now. Expiry is checked in the same
/// statement that clears the token.
fn consume_reset_sql() -> String {
    format!(
        r#"
        UPDATE users
           SET password_hash = $2,
               reset_password_token = NULL,
               reset_password_expires = NULL,
               verification_token = NULL,
               is_email_verified = TRUE,
               updated_at = now()
         WHERE reset_password_token = $1 AND reset_password_expires > $3
        RETURNING {USER_COLUMNS}
        "#
    )
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, role,
                               is_email_verified, verification_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(new.is_email_verified)
        .bind(&new.verification_token)
        .fetch_one(&self.db)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        if patch.is_empty() {
            return self.find_by_id(id).await?.ok_or(StoreError::NotFound);
        }
        if let Some(email) = &patch.email {
            let taken: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM users WHERE email = $1 AND id <> $2")
                    .bind(email)
                    .bind(id)
                    .fetch_optional(&self.db)
                    .await?;
            if taken.is_some() {
                return Err(StoreError::Conflict);
            }
        }

        // the unique index still rejects a racing writer that slipped past the check
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET first_name    = COALESCE($2, first_name),
                   last_name     = COALESCE($3, last_name),
                   email         = COALESCE($4, email),
                   role          = COALESCE($5, role),
                   password_hash = COALESCE($6, password_hash),
                   updated_at    = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(&patch.email)
        .bind(patch.role.map(|r| r.as_str()))
        .bind(&patch.password_hash)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)?.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)?.ok_or(StoreError::NotFound)
    }

    async fn list(&self, filter: &UserFilter, page: PageParams) -> StoreResult<(Vec<User>, u64)> {
        let mut count_q = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut count_q, filter);

        let mut rows_q = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filters(&mut rows_q, filter);
        rows_q.push(" ORDER BY ").push(order_by(filter.sort));
        rows_q.push(" LIMIT ");
        rows_q.push_bind(page.limit);
        rows_q.push(" OFFSET ");
        rows_q.push_bind(page.skip);

        let (total, rows) = tokio::try_join!(
            count_q.build_query_scalar::<i64>().fetch_one(&self.db),
            rows_q.build_query_as::<UserRow>().fetch_all(&self.db),
        )
        .context("list users")?;

        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!(total, returned = users.len(), "listed users");
        Ok((users, total.max(0) as u64))
    }

    async fn set_reset_token(
        &self,
        email: &str,
        token: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET reset_password_token = $2, reset_password_expires = $3, updated_at = now()
             WHERE email = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(token)
        .bind(expires)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE reset_password_token = $1 AND reset_password_expires > $2"
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn consume_verification_token(&self, token: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&consume_verification_sql())
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        into_user(row)
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&consume_reset_sql())
            .bind(token)
            .bind(password_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;
        into_user(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_render_as_bound_substring_checks() {
        let filter = UserFilter {
            email: Some("example".into()),
            role: Some("stud".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM users WHERE strpos(lower(email), lower($1)) > 0 \
             AND strpos(lower(role), lower($2)) > 0"
        );
    }

    #[test]
    fn order_by_defaults_to_creation_time() {
        assert_eq!(order_by(None), "created_at ASC, id ASC");
        assert_eq!(
            order_by(Some((UserField::FirstName, true))),
            "first_name COLLATE \"C\" DESC, created_at ASC, id ASC"
        );
        assert_eq!(
            order_by(Some((UserField::CreatedAt, true))),
            "created_at DESC, id DESC"
        );
    }

    fn squash(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn filters_use_typed_columns() {
        let filter = UserFilter {
            first_name: Some("al".into()),
            last_name: Some("sm".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filters(&mut qb, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM users WHERE strpos(lower(first_name), lower($1)) > 0 \
             AND strpos(lower(last_name), lower($2)) > 0"
        );
    }

    #[test]
    fn verification_consume_is_one_conditional_update() {
        let sql = squash(&consume_verification_sql());
        assert!(sql.starts_with("UPDATE users SET is_email_verified = TRUE, verification_token = NULL"));
        assert!(sql.contains("WHERE verification_token = $1 RETURNING"));
    }

    #[test]
    fn reset_consume_checks_token_and_expiry_in_the_write() {
        let sql = squash(&consume_reset_sql());
        assert!(sql.starts_with("UPDATE users SET password_hash = $2"));
        assert!(sql.contains("reset_password_token = NULL"));
        assert!(sql.contains("reset_password_expires = NULL"));
        assert!(sql.contains("WHERE reset_password_token = $1 AND reset_password_expires > $3 RETURNING"));
    }
}
