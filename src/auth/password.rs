use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use tracing::error;

pub const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    /// Verified against when no account matches, so a miss costs the same as a hit.
    static ref DUMMY_HASH: String = hash_password("ecocampus-no-such-account").unwrap_or_default();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Runs the hash on the blocking pool.
pub async fn hash_password_async(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain)).await?
}

pub async fn verify_password_async(plain: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash)).await?
}

/// Burns one verify against a hash no password matches.
pub async fn verify_dummy_async(plain: String) {
    let res = tokio::task::spawn_blocking(move || verify_password(&plain, &DUMMY_HASH)).await;
    if let Ok(Err(e)) = res {
        error!(error = %e, "dummy verify failed");
    }
}

pub fn is_acceptable(plain: &str) -> bool {
    plain.chars().count() >= MIN_PASSWORD_LEN
}
