//! Validation rules, password hashing and token helpers shared by the auth flows.

use anyhow::{anyhow, Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::api::handlers::notice::FormErrors;

pub(crate) const MIN_PASSWORD_LENGTH: usize = 8;
pub(crate) const MAX_USERNAME_LENGTH: usize = 30;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Letters, digits and `@ . + - _`, up to 30 characters.
pub(crate) fn valid_username(username: &str) -> bool {
    username.chars().count() <= MAX_USERNAME_LENGTH
        && Regex::new(r"^[\w.@+-]+$").is_ok_and(|regex| regex.is_match(username))
}

/// Record username errors under `field`.
pub(crate) fn check_username(field: &str, username: &str, errors: &mut FormErrors) {
    if username.is_empty() {
        errors.add(field, "This field is required.");
    } else if !valid_username(username) {
        errors.add(
            field,
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters, at most 30 of them.",
        );
    }
}

/// Record email errors under `field`.
pub(crate) fn check_email(field: &str, email_normalized: &str, errors: &mut FormErrors) {
    if email_normalized.is_empty() {
        errors.add(field, "This field is required.");
    } else if !valid_email(email_normalized) {
        errors.add(field, "Enter a valid email address.");
    }
}

/// Check a new password and its confirmation.
///
/// Strength problems are reported under `password_field`, a mismatch under
/// `confirmation_field`.
pub(crate) fn check_new_password(
    password_field: &str,
    password: &str,
    confirmation_field: &str,
    confirmation: &str,
    errors: &mut FormErrors,
) {
    if password.is_empty() {
        errors.add(password_field, "This field is required.");
    } else {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add(
                password_field,
                format!(
                    "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
                ),
            );
        }
        if password.chars().all(|c| c.is_ascii_digit()) {
            errors.add(password_field, "This password is entirely numeric.");
        }
    }

    if confirmation.is_empty() {
        errors.add(confirmation_field, "This field is required.");
    } else if !password.is_empty() && password != confirmation {
        errors.add(confirmation_field, "The two password fields didn't match.");
    }
}

/// Hash a password into a PHC string (Argon2id, random salt).
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Check a password against a stored PHC string.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2 is CPU bound, keep it off the async workers.
pub(crate) async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
}

pub(crate) async fn verify_password_blocking(password: String, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .context("password verification task failed")?
}

/// 32 random bytes, URL-safe base64. Used for session and password reset tokens.
///
/// The raw value only goes to the client; the database stores [`hash_token`].
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(crate) fn build_activation_url(frontend_base_url: &str, key: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/activate/{key}")
}

pub(crate) fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset/{token}")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated constraint, if the database reported one.
pub(crate) fn violated_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
        _ => None,
    }
}
