//! Database helpers for accounts, sessions and password reset tokens.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::utils::{generate_token, hash_token, is_unique_violation, violated_constraint};

const USERNAME_INDEX: &str = "users_username_lower_idx";

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum InsertUserOutcome {
    Created(Uuid),
    UsernameTaken,
    EmailTaken,
}

/// Fields needed to check a login attempt.
pub(super) struct CredentialRecord {
    pub(super) user_id: Uuid,
    pub(super) password_hash: String,
    pub(super) is_active: bool,
}

/// Minimal data returned for a valid session token.
#[derive(Clone, Debug)]
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) is_staff: bool,
    pub(crate) can_change_users: bool,
}

/// Account targeted by a password reset request.
pub(super) struct ResetTarget {
    pub(super) user_id: Uuid,
    pub(super) username: String,
}

pub(super) async fn username_taken(pool: &PgPool, username: &str) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE lower(username) = lower($1) LIMIT 1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check username")?;
    Ok(row.is_some())
}

pub(super) async fn email_taken(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE email = $1 LIMIT 1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check email")?;
    Ok(row.is_some())
}

/// Insert a user. A unique violation leaves the transaction aborted; the
/// caller must roll back.
pub(super) async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
    email: &str,
    password_hash: &str,
    is_active: bool,
) -> Result<InsertUserOutcome> {
    let query = r"
        INSERT INTO users (username, email, password_hash, is_active)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(is_active)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(InsertUserOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => {
            if violated_constraint(&err).as_deref() == Some(USERNAME_INDEX) {
                Ok(InsertUserOutcome::UsernameTaken)
            } else {
                Ok(InsertUserOutcome::EmailTaken)
            }
        }
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Look up login data by username (case-insensitive) or email.
///
/// A username match wins over an email match.
pub(super) async fn lookup_credentials(
    pool: &PgPool,
    login: &str,
) -> Result<Option<CredentialRecord>> {
    let query = r"
        SELECT id, password_hash, is_active
        FROM users
        WHERE lower(username) = lower($1) OR email = lower($1)
        ORDER BY (lower(username) = lower($1)) DESC
        LIMIT 1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
    }))
}

pub(super) async fn fetch_password_hash(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch password hash")?;
    Ok(row.map(|row| row.get("password_hash")))
}

pub(super) async fn update_password(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

pub(super) async fn record_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record login")?;
    Ok(())
}

/// Store a new session and return the raw token for the cookie.
pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(hash_token(&token))
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session hash. Expired sessions and inactive users resolve to `None`.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        FROM users
        WHERE users.id = user_sessions.user_id
          AND user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
          AND users.is_active
        RETURNING users.id, users.username, users.email, users.is_staff, users.can_change_users
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        is_staff: row.get("is_staff"),
        can_change_users: row.get("can_change_users"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(super) async fn delete_user_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to revoke sessions")?;
    Ok(result.rows_affected())
}

pub(super) async fn lookup_reset_target(pool: &PgPool, email: &str) -> Result<Option<ResetTarget>> {
    let query = "SELECT id, username FROM users WHERE email = $1 AND is_active LIMIT 1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password reset target")?;

    Ok(row.map(|row| ResetTarget {
        user_id: row.get("id"),
        username: row.get("username"),
    }))
}

/// Store a hashed reset token and return the raw value for the email link.
pub(super) async fn insert_password_reset(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    let token = generate_token()?;
    let query = r"
        INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert password reset token")?;
    Ok(token)
}

/// Mark an unexpired, unused reset token as consumed and return its user.
pub(super) async fn consume_password_reset(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE password_reset_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume password reset token")?;
    Ok(row.map(|row| row.get("user_id")))
}
