//! Database helpers for users and their profiles.

use anyhow::{Context, Result};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    settings::Lookup,
    types::{CleanProfile, ProfileView, UserDetailResponse, UserView},
};

const USER_COLUMNS: &str = r#"
    id::text AS id,
    username,
    email,
    is_active,
    is_staff,
    to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS date_joined,
    to_char(last_login AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS last_login
"#;

const PROFILE_COLUMNS: &str = r#"
    display_name,
    bio,
    location,
    website,
    to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
    to_char(updated_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS updated_at
"#;

fn user_from_row(row: &PgRow) -> UserView {
    UserView {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        is_active: row.get("is_active"),
        is_staff: row.get("is_staff"),
        date_joined: row.get("date_joined"),
        last_login: row.get("last_login"),
    }
}

fn profile_from_row(row: &PgRow) -> ProfileView {
    ProfileView {
        display_name: row.get("display_name"),
        bio: row.get("bio"),
        location: row.get("location"),
        website: row.get("website"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Find a user by the configured profile URL field.
pub(crate) async fn fetch_user(pool: &PgPool, lookup: &Lookup) -> Result<Option<UserView>> {
    let condition = match lookup {
        Lookup::Username(_) => "lower(username) = lower($1)",
        Lookup::Id(_) => "id = $1",
        Lookup::Email(_) => "email = $1",
    };
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {condition} LIMIT 1");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let statement = sqlx::query(&query);
    let statement = match lookup {
        Lookup::Username(value) | Lookup::Email(value) => statement.bind(value.as_str()),
        Lookup::Id(id) => statement.bind(*id),
    };
    let row = statement
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(crate) async fn fetch_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserView>> {
    fetch_user(pool, &Lookup::Id(user_id)).await
}

pub(crate) async fn fetch_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<ProfileView>> {
    let query = format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch profile")?;

    Ok(row.as_ref().map(profile_from_row))
}

/// Parse the id of a loaded user back into a UUID.
pub(crate) fn user_uuid(user: &UserView) -> Result<Uuid> {
    Uuid::parse_str(&user.id).with_context(|| format!("invalid user id {}", user.id))
}

/// Load a user with their profile. Users without a profile row get empty fields.
pub(crate) async fn fetch_user_detail(
    pool: &PgPool,
    lookup: &Lookup,
) -> Result<Option<UserDetailResponse>> {
    let Some(user) = fetch_user(pool, lookup).await? else {
        return Ok(None);
    };
    let profile = fetch_profile(pool, user_uuid(&user)?)
        .await?
        .unwrap_or_default();
    Ok(Some(UserDetailResponse { user, profile }))
}

/// Create the profile row of a new user inside the signup transaction.
pub(crate) async fn insert_profile(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    profile: &CleanProfile,
) -> Result<()> {
    let query = r"
        INSERT INTO user_profiles (user_id, display_name, bio, location, website)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(profile.display_name.as_deref())
        .bind(profile.bio.as_deref())
        .bind(profile.location.as_deref())
        .bind(profile.website.as_deref())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert profile")?;

    Ok(())
}

/// Replace the editable fields, creating the row for users that never had one.
pub(crate) async fn upsert_profile(
    pool: &PgPool,
    user_id: Uuid,
    profile: &CleanProfile,
) -> Result<ProfileView> {
    let query = format!(
        r"
        INSERT INTO user_profiles (user_id, display_name, bio, location, website)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET display_name = EXCLUDED.display_name,
            bio = EXCLUDED.bio,
            location = EXCLUDED.location,
            website = EXCLUDED.website,
            updated_at = NOW()
        RETURNING {PROFILE_COLUMNS}
    "
    );
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPSERT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(profile.display_name.as_deref())
        .bind(profile.bio.as_deref())
        .bind(profile.location.as_deref())
        .bind(profile.website.as_deref())
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to save profile")?;

    Ok(profile_from_row(&row))
}
