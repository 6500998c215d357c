//! Argon2id password hashing.
//!
//! Hashing is CPU-bound, so the async entry points run it on the blocking
//! pool instead of a runtime worker.

use crate::error::{ApiError, Result};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Argon2,
};
use std::sync::LazyLock;

/// Hash checked when the account does not exist, so a miss costs as much as a
/// wrong password.
static ABSENT_USER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("absent-user-placeholder").ok());

/// Hash a plaintext password into a PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::fault(format!("Password hashing failed: {e}")))
}

/// Check a plaintext password against a stored PHC string.
///
/// `Ok(false)` for a wrong password; an unparsable hash is a fault.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::fault(format!("Invalid password hash format: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(ApiError::fault(format!("Password verification failed: {e}"))),
    }
}

pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?
}

/// Run a full verification for a login whose user was not found. Always
/// `Ok(false)`.
pub async fn verify_absent_user_blocking(password: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let hash = ABSENT_USER_HASH
            .as_deref()
            .ok_or_else(|| ApiError::fault("placeholder password hash unavailable"))?;
        verify_password(&password, hash).map(|_| false)
    })
    .await?
}
