//! Activation endpoints.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::{
    mailer::ActivationMailer,
    model::valid_key,
    storage::{activate_key, lookup_inactive_user},
};
use crate::api::{
    handlers::{
        auth::{
            utils::{normalize_email, valid_email},
            AuthState,
        },
        notice::{ActionResponse, FormErrors, Notice},
    },
    paths,
};

const INVALID_KEY: &str = "Invalid activation key";
const ACTIVATED: &str = "Your account has been activated. You can now proceed to log in.";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActivateRequest {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResendActivationRequest {
    #[serde(default)]
    pub email: String,
}

/// Activate the account owning `key`.
#[utoipa::path(
    post,
    path = "/v1/auth/activate",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "Account activated.", body = ActionResponse),
        (status = 400, description = "Unknown or already used key.", body = FormErrors),
    ),
    tag = "auth"
)]
pub async fn activate(
    pool: Extension<PgPool>,
    payload: Option<Json<ActivateRequest>>,
) -> impl IntoResponse {
    let key = payload
        .map(|Json(request)| request.key.trim().to_string())
        .unwrap_or_default();
    if !valid_key(&key) {
        return FormErrors::non_field(INVALID_KEY).into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin activation transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match activate_key(&mut tx, &key).await {
        Ok(Some(user_id)) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit activation: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            info!(user_id = %user_id, "account activated");
            let body = ActionResponse::new(Notice::success(ACTIVATED), paths::LOGIN);
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(None) => {
            let _ = tx.rollback().await;
            FormErrors::non_field(INVALID_KEY).into_response()
        }
        Err(err) => {
            error!("Failed to activate account: {err:#}");
            let _ = tx.rollback().await;
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resend the activation email (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/activation/resend",
    request_body = ResendActivationRequest,
    responses(
        (status = 204, description = "Resend accepted."),
    ),
    tag = "auth"
)]
pub async fn resend_activation(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendActivationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return StatusCode::NO_CONTENT;
    };
    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::NO_CONTENT;
    }

    let user = match lookup_inactive_user(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NO_CONTENT,
        Err(err) => {
            error!("Failed to lookup inactive user: {err:#}");
            return StatusCode::NO_CONTENT;
        }
    };

    let mailer = ActivationMailer::new(auth_state.config().frontend_base_url());
    let result = async {
        let mut tx = pool.begin().await?;
        mailer.issue(&mut tx, &user, false).await?;
        tx.commit().await?;
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = result {
        error!("Failed to queue activation resend: {err:#}");
    }

    StatusCode::NO_CONTENT
}
