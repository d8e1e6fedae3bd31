//! Profile editing for the current user, and for staff on behalf of others.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{
    storage::{fetch_profile, fetch_user, upsert_profile, user_uuid},
    types::{ProfileChangeResponse, ProfileForm},
};
use crate::api::{
    handlers::{
        auth::{principal::require_auth, AuthState},
        notice::{FormErrors, Notice},
    },
    paths,
};

const FORM_INVALID: &str = "Please correct the errors below.";
const CHANGES_SAVED: &str = "Your changes were saved.";

#[utoipa::path(
    get,
    path = "/v1/me/profile",
    responses(
        (status = 200, description = "Current profile form values.", body = ProfileForm),
        (status = 401, description = "Missing or invalid session."),
    ),
    tag = "profiles"
)]
pub async fn current_profile_form(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    form_response(&pool, principal.user_id).await
}

#[utoipa::path(
    post,
    path = "/v1/me/profile",
    request_body = ProfileForm,
    responses(
        (status = 200, description = "Profile saved.", body = ProfileChangeResponse),
        (status = 400, description = "Invalid profile fields.", body = FormErrors),
        (status = 401, description = "Missing or invalid session."),
    ),
    tag = "profiles"
)]
pub async fn change_current_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    payload: Option<Json<ProfileForm>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let form = payload.map(|Json(form)| form).unwrap_or_default();
    save_profile(&pool, principal.user_id, &form, paths::CURRENT_USER_DETAIL.to_string()).await
}

#[utoipa::path(
    get,
    path = "/v1/users/{lookup}/profile",
    params(
        ("lookup" = String, Path, description = "Value of the configured profile URL field."),
    ),
    responses(
        (status = 200, description = "Profile form values of the user.", body = ProfileForm),
        (status = 401, description = "Missing or invalid session."),
        (status = 403, description = "Missing the change-user permission."),
        (status = 404, description = "No user matches the lookup value."),
    ),
    tag = "profiles"
)]
pub async fn user_profile_form(
    Path(lookup): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match resolve_managed_user(&lookup, &headers, &pool, &auth_state).await {
        Ok((user_id, _)) => form_response(&pool, user_id).await,
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/{lookup}/profile",
    params(
        ("lookup" = String, Path, description = "Value of the configured profile URL field."),
    ),
    request_body = ProfileForm,
    responses(
        (status = 200, description = "Profile saved.", body = ProfileChangeResponse),
        (status = 400, description = "Invalid profile fields.", body = FormErrors),
        (status = 401, description = "Missing or invalid session."),
        (status = 403, description = "Missing the change-user permission."),
        (status = 404, description = "No user matches the lookup value."),
    ),
    tag = "profiles"
)]
pub async fn change_user_profile(
    Path(lookup): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ProfileForm>>,
) -> impl IntoResponse {
    let (user_id, redirect) =
        match resolve_managed_user(&lookup, &headers, &pool, &auth_state).await {
            Ok(resolved) => resolved,
            Err(response) => return response,
        };

    let form = payload.map(|Json(form)| form).unwrap_or_default();
    save_profile(&pool, user_id, &form, redirect).await
}

/// Authorize a staff editor and resolve the target user id and its detail URL.
async fn resolve_managed_user(
    lookup: &str,
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<(Uuid, String), Response> {
    let principal = require_auth(headers, pool)
        .await
        .map_err(IntoResponse::into_response)?;
    if !principal.can_change_users() {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    let url_field = auth_state.profiles().url_field();
    let lookup = url_field
        .parse_lookup(lookup)
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;

    let user = match fetch_user(pool, &lookup).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(StatusCode::NOT_FOUND.into_response()),
        Err(err) => {
            error!("Failed to fetch user: {err:#}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };

    let user_id = user_uuid(&user).map_err(|err| {
        error!("Failed to read user id: {err:#}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;
    let redirect = detail_redirect(principal.user_id, user_id, &url_field.value_of(&user));
    Ok((user_id, redirect))
}

/// Editing your own profile through the staff view lands on the current-user page.
fn detail_redirect(editor_id: Uuid, user_id: Uuid, lookup: &str) -> String {
    if editor_id == user_id {
        paths::CURRENT_USER_DETAIL.to_string()
    } else {
        paths::user_detail(lookup)
    }
}

async fn form_response(pool: &PgPool, user_id: Uuid) -> Response {
    match fetch_profile(pool, user_id).await {
        Ok(profile) => {
            let form = profile.as_ref().map(ProfileForm::from).unwrap_or_default();
            (StatusCode::OK, Json(form)).into_response()
        }
        Err(err) => {
            error!("Failed to fetch profile: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn save_profile(pool: &PgPool, user_id: Uuid, form: &ProfileForm, redirect: String) -> Response {
    let profile = match form.clean() {
        Ok(profile) => profile,
        Err(errors) => {
            return errors
                .with_notice(Notice::error(FORM_INVALID))
                .into_response();
        }
    };

    match upsert_profile(pool, user_id, &profile).await {
        Ok(profile) => {
            info!(user_id = %user_id, "profile saved");
            let response = ProfileChangeResponse {
                profile,
                notice: Notice::success(CHANGES_SAVED),
                redirect,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!("Failed to save profile: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{
        auth::{AuthConfig, SignupHooks},
        profiles::ProfileSettings,
    };
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> anyhow::Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            ProfileSettings::new(),
            SignupHooks::new(),
        ))
    }

    #[tokio::test]
    async fn current_profile_views_require_login() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let form = current_profile_form(HeaderMap::new(), Extension(pool.clone()))
            .await
            .into_response();
        assert_eq!(form.status(), StatusCode::UNAUTHORIZED);

        let change = change_current_profile(HeaderMap::new(), Extension(pool), None)
            .await
            .into_response();
        assert_eq!(change.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn editing_other_profiles_requires_login() -> anyhow::Result<()> {
        let response = change_user_profile(
            Path("alice".to_string()),
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(ProfileForm::default())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[test]
    fn self_edit_redirects_to_current_user_page() {
        let staff = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(detail_redirect(staff, staff, "root"), paths::CURRENT_USER_DETAIL);
        assert_eq!(detail_redirect(staff, other, "alice"), "/v1/users/alice");
    }

    #[tokio::test]
    async fn invalid_form_carries_error_notice() -> anyhow::Result<()> {
        let form = ProfileForm {
            website: Some("ftp://example.com".to_string()),
            ..ProfileForm::default()
        };
        let response = save_profile(
            &lazy_pool()?,
            Uuid::nil(),
            &form,
            paths::CURRENT_USER_DETAIL.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let errors: FormErrors = serde_json::from_slice(&body)?;
        assert!(errors.field("website").is_some());
        let json: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(json["notice"]["level"], "error");
        assert_eq!(json["notice"]["message"], FORM_INVALID);
        Ok(())
    }
}
