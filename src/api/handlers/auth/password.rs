//! Password change and reset.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    principal::require_auth,
    state::AuthState,
    storage::{
        consume_password_reset, delete_user_sessions, fetch_password_hash, insert_password_reset,
        lookup_reset_target, update_password,
    },
    types::{PasswordChangeRequest, PasswordResetConfirmRequest, PasswordResetRequest},
    utils::{
        build_reset_url, check_new_password, hash_password_blocking, hash_token, normalize_email,
        valid_email, verify_password_blocking,
    },
};
use crate::api::{
    email::{enqueue_email, TEMPLATE_PASSWORD_RESET},
    handlers::notice::{ActionResponse, FormErrors, Notice, NON_FIELD_ERRORS},
    paths,
};

const WRONG_OLD_PASSWORD: &str =
    "Your old password was entered incorrectly. Please enter it again.";
const INVALID_RESET_TOKEN: &str =
    "The password reset link was invalid, possibly because it has already been used.";

#[utoipa::path(
    post,
    path = "/v1/me/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed.", body = ActionResponse),
        (status = 400, description = "Wrong old password or invalid new password.", body = FormErrors),
        (status = 401, description = "Missing or invalid session."),
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    payload: Option<Json<PasswordChangeRequest>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return FormErrors::non_field("Missing password change payload.").into_response();
    };

    let mut errors = FormErrors::new();
    if request.old_password.is_empty() {
        errors.add("old_password", "This field is required.");
    }
    check_new_password(
        "new_password1",
        &request.new_password1,
        "new_password2",
        &request.new_password2,
        &mut errors,
    );
    if let Err(errors) = errors.into_result() {
        return errors.into_response();
    }

    let stored_hash = match fetch_password_hash(&pool, principal.user_id).await {
        Ok(Some(hash)) => hash,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to fetch password hash: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match verify_password_blocking(request.old_password, stored_hash).await {
        Ok(true) => {}
        Ok(false) => {
            let mut errors = FormErrors::new();
            errors.add("old_password", WRONG_OLD_PASSWORD);
            return errors.into_response();
        }
        Err(err) => {
            error!("Failed to verify password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if let Err(status) = set_password(&pool, principal.user_id, request.new_password1).await {
        return status.into_response();
    }

    info!(user_id = %principal.user_id, "password changed");
    let body = ActionResponse::new(
        Notice::info("Your password was changed."),
        paths::CURRENT_USER_DETAIL,
    );
    (StatusCode::OK, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Reset email queued when the account exists."),
    ),
    tag = "auth"
)]
pub async fn request_password_reset(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    // Always 204, whether or not the account exists.
    let Some(Json(request)) = payload else {
        return StatusCode::NO_CONTENT;
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::NO_CONTENT;
    }

    let target = match lookup_reset_target(&pool, &email).await {
        Ok(Some(target)) => target,
        Ok(None) => {
            debug!("password reset requested for unknown or inactive account");
            return StatusCode::NO_CONTENT;
        }
        Err(err) => {
            error!("Failed to lookup password reset target: {err:#}");
            return StatusCode::NO_CONTENT;
        }
    };

    let config = auth_state.config();
    let result = async {
        let mut tx = pool.begin().await?;
        let token =
            insert_password_reset(&mut tx, target.user_id, config.password_reset_ttl_seconds())
                .await?;
        let payload = json!({
            "username": target.username,
            "email": &email,
            "reset_url": build_reset_url(config.frontend_base_url(), &token),
            "expires_in_seconds": config.password_reset_ttl_seconds(),
        });
        enqueue_email(&mut tx, &email, TEMPLATE_PASSWORD_RESET, &payload).await?;
        tx.commit().await?;
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = result {
        error!("Failed to queue password reset: {err:#}");
    }

    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirmRequest,
    responses(
        (status = 200, description = "Password set, all sessions revoked.", body = ActionResponse),
        (status = 400, description = "Invalid token or password.", body = FormErrors),
    ),
    tag = "auth"
)]
pub async fn confirm_password_reset(
    pool: Extension<PgPool>,
    payload: Option<Json<PasswordResetConfirmRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return FormErrors::non_field(INVALID_RESET_TOKEN).into_response();
    };

    let token = request.token.trim();
    let mut errors = FormErrors::new();
    if token.is_empty() {
        errors.add(NON_FIELD_ERRORS, INVALID_RESET_TOKEN);
    }
    check_new_password(
        "new_password1",
        &request.new_password1,
        "new_password2",
        &request.new_password2,
        &mut errors,
    );
    if let Err(errors) = errors.into_result() {
        return errors.into_response();
    }

    let password_hash = match hash_password_blocking(request.new_password1.clone()).await {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin password reset transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = match consume_password_reset(&mut tx, &hash_token(token)).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            let _ = tx.rollback().await;
            return FormErrors::non_field(INVALID_RESET_TOKEN).into_response();
        }
        Err(err) => {
            error!("Failed to consume password reset token: {err:#}");
            let _ = tx.rollback().await;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let result = async {
        update_password(&mut tx, user_id, &password_hash).await?;
        let revoked = delete_user_sessions(&mut tx, user_id).await?;
        tx.commit().await?;
        anyhow::Ok(revoked)
    }
    .await;

    match result {
        Ok(revoked) => {
            info!(user_id = %user_id, revoked_sessions = revoked, "password reset completed");
            let body = ActionResponse::new(
                Notice::info("Your password has been set. You may go ahead and log in now."),
                paths::LOGIN,
            );
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            error!("Failed to reset password: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Hash and store a new password. Existing sessions stay valid.
async fn set_password(pool: &PgPool, user_id: uuid::Uuid, password: String) -> Result<(), StatusCode> {
    let password_hash = hash_password_blocking(password).await.map_err(|err| {
        error!("Failed to hash password: {err:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let result = async {
        let mut tx = pool.begin().await?;
        update_password(&mut tx, user_id, &password_hash).await?;
        tx.commit().await?;
        anyhow::Ok(())
    }
    .await;

    result.map_err(|err| {
        error!("Failed to update password: {err:#}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{
        auth::{hooks::SignupHooks, AuthConfig},
        profiles::ProfileSettings,
    };
    use axum::body::to_bytes;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> anyhow::Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn change_password_requires_login() -> anyhow::Result<()> {
        let response = change_password(HeaderMap::new(), Extension(lazy_pool()?), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn reset_request_with_bad_email_is_no_content() -> anyhow::Result<()> {
        let state = Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            ProfileSettings::new(),
            SignupHooks::new(),
        ));
        let request = PasswordResetRequest {
            email: "not-an-email".to_string(),
        };
        let response =
            request_password_reset(Extension(lazy_pool()?), Extension(state), Some(Json(request)))
                .await
                .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn reset_confirm_validates_before_touching_tokens() -> anyhow::Result<()> {
        let request = PasswordResetConfirmRequest {
            token: String::new(),
            new_password1: "short".to_string(),
            new_password2: "short".to_string(),
        };
        let response = confirm_password_reset(Extension(lazy_pool()?), Some(Json(request)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let errors: FormErrors = serde_json::from_slice(&body)?;
        assert!(errors.field(NON_FIELD_ERRORS).is_some());
        assert!(errors.field("new_password1").is_some());
        Ok(())
    }
}
