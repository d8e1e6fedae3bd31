//! Database helpers for activation codes.

use anyhow::{Context, Result};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::model::{ActivationCode, NewActivationCode};

const CODE_COLUMNS: &str = r#"
    id,
    key,
    user_id,
    activated,
    to_char(created AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created,
    to_char(modified AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS modified
"#;

/// An account still waiting for activation.
#[derive(Clone, Debug)]
pub(super) struct InactiveUser {
    pub(super) id: Uuid,
    pub(super) username: String,
    pub(super) email: String,
}

fn code_from_row(row: &PgRow) -> ActivationCode {
    ActivationCode {
        id: row.get("id"),
        key: row.get("key"),
        user_id: row.get("user_id"),
        activated: row.get("activated"),
        created: row.get("created"),
        modified: row.get("modified"),
    }
}

pub(super) async fn insert_code(
    tx: &mut Transaction<'_, Postgres>,
    code: &NewActivationCode,
) -> Result<ActivationCode> {
    let query = format!(
        r"
        INSERT INTO activation_codes (key, user_id)
        VALUES ($1, $2)
        RETURNING {CODE_COLUMNS}
    "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(&code.key)
        .bind(code.user_id)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert activation code")?;
    Ok(code_from_row(&row))
}

/// Newest code of the user that was not used yet, locked for the transaction.
pub(super) async fn latest_pending_code(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<ActivationCode>> {
    let query = format!(
        r"
        SELECT {CODE_COLUMNS}
        FROM activation_codes
        WHERE user_id = $1
          AND NOT activated
        ORDER BY created DESC, id DESC
        LIMIT 1
        FOR UPDATE
    "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup pending activation code")?;
    Ok(row.as_ref().map(code_from_row))
}

/// Flip an unused code to activated and mark its user active.
///
/// Returns the activated user, or `None` for unknown and already used keys.
pub(super) async fn activate_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE activation_codes
        SET activated = TRUE,
            modified = NOW()
        WHERE key = $1
          AND NOT activated
        RETURNING user_id
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(key)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume activation code")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let user_id: Uuid = row.get("user_id");

    let query = "UPDATE users SET is_active = TRUE, updated_at = NOW() WHERE id = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to activate user")?;

    Ok(Some(user_id))
}

pub(super) async fn lookup_inactive_user(pool: &PgPool, email: &str) -> Result<Option<InactiveUser>> {
    let query = r"
        SELECT id, username, email
        FROM users
        WHERE email = $1
          AND NOT is_active
        LIMIT 1
    ";
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
        .context("failed to lookup inactive user")?;

    Ok(row.map(|row| InactiveUser {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
    }))
}
