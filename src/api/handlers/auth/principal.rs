//! Authenticated principal extraction.

use axum::http::{HeaderMap, StatusCode};
use sqlx::PgPool;
use uuid::Uuid;

use super::session::authenticate_session;
use super::storage::SessionRecord;

/// Authenticated user context derived from the session cookie or bearer token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
    pub can_change_users: bool,
}

impl Principal {
    /// Staff holding the change-user permission may read and edit any profile.
    #[must_use]
    pub fn can_change_users(&self) -> bool {
        self.is_staff && self.can_change_users
    }
}

impl From<SessionRecord> for Principal {
    fn from(record: SessionRecord) -> Self {
        Self {
            user_id: record.user_id,
            username: record.username,
            email: record.email,
            is_staff: record.is_staff,
            can_change_users: record.can_change_users,
        }
    }
}

/// Resolve the request session into a principal, or return 401 for missing sessions.
pub async fn require_auth(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, StatusCode> {
    match authenticate_session(headers, pool).await {
        Ok(Some(record)) => Ok(record.into()),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(status) => Err(status),
    }
}

/// Like [`require_auth`], but anonymous requests resolve to `None`.
pub async fn optional_auth(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<Principal>, StatusCode> {
    authenticate_session(headers, pool)
        .await
        .map(|record| record.map(Principal::from))
}
