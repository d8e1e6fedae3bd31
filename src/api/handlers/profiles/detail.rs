//! Profile detail views.
//!
//! Flow Overview:
//! 1) Resolve the optional session.
//! 2) Apply the visibility settings (public, public when logged in, or staff).
//! 3) Match the path value against the configured URL field and load the
//!    user with their profile.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use super::{settings::Lookup, storage::fetch_user_detail, types::UserDetailResponse};
use crate::api::{
    handlers::auth::{
        principal::{optional_auth, require_auth},
        AuthState,
    },
    paths,
};

#[utoipa::path(
    get,
    path = "/v1/users/{lookup}",
    params(
        ("lookup" = String, Path, description = "Value of the configured profile URL field (username, id or email)."),
    ),
    responses(
        (status = 200, description = "User and profile.", body = UserDetailResponse),
        (status = 403, description = "Profiles are not visible to this requester."),
        (status = 404, description = "No user matches the lookup value."),
    ),
    tag = "profiles"
)]
pub async fn user_detail(
    Path(lookup): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let viewer = match optional_auth(&headers, &pool).await {
        Ok(viewer) => viewer,
        Err(status) => return status.into_response(),
    };

    let settings = auth_state.profiles();
    if !settings.can_view(viewer.as_ref()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(lookup) = settings.url_field().parse_lookup(&lookup) else {
        debug!(field = %settings.url_field(), "unparsable profile lookup value");
        return StatusCode::NOT_FOUND.into_response();
    };

    detail_response(&pool, &lookup).await
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "The authenticated user and their profile.", body = UserDetailResponse),
        (status = 401, description = "Missing or invalid session."),
    ),
    tag = "profiles"
)]
pub async fn current_user_detail(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    detail_response(&pool, &Lookup::Id(principal.user_id)).await
}

#[utoipa::path(
    get,
    path = "/v1/profile",
    responses(
        (status = 303, description = "Redirect to the current user's detail page."),
        (status = 401, description = "Missing or invalid session."),
    ),
    tag = "profiles"
)]
pub async fn redirect_to_current_user_detail(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> impl IntoResponse {
    match require_auth(&headers, &pool).await {
        Ok(_) => Redirect::to(paths::CURRENT_USER_DETAIL).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn detail_response(pool: &PgPool, lookup: &Lookup) -> Response {
    match fetch_user_detail(pool, lookup).await {
        Ok(Some(detail)) => (StatusCode::OK, Json(detail)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to fetch user detail: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{
        auth::{AuthConfig, SignupHooks},
        profiles::{ProfileSettings, UrlField},
    };
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> anyhow::Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn auth_state(profiles: ProfileSettings) -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            profiles,
            SignupHooks::new(),
        ))
    }

    #[tokio::test]
    async fn private_profiles_are_forbidden_to_anonymous_users() -> anyhow::Result<()> {
        let response = user_detail(
            Path("alice".to_string()),
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state(ProfileSettings::new())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn logged_in_only_profiles_are_forbidden_to_anonymous_users() -> anyhow::Result<()> {
        let settings = ProfileSettings::new().with_public_when_logged_in(true);
        let response = user_detail(
            Path("alice".to_string()),
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state(settings)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn non_uuid_lookup_is_not_found_for_id_urls() -> anyhow::Result<()> {
        let settings = ProfileSettings::new()
            .with_public(true)
            .with_url_field(UrlField::Id);
        let response = user_detail(
            Path("42".to_string()),
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state(settings)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn current_user_views_require_login() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let detail = current_user_detail(HeaderMap::new(), Extension(pool.clone()))
            .await
            .into_response();
        assert_eq!(detail.status(), StatusCode::UNAUTHORIZED);

        let redirect = redirect_to_current_user_detail(HeaderMap::new(), Extension(pool))
            .await
            .into_response();
        assert_eq!(redirect.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
