//! Account signup.
//!
//! Flow Overview:
//! 1) Authenticated requesters are sent to the login redirect instead.
//! 2) Account and profile fields are validated together so every error is
//!    reported at once.
//! 3) User, profile and post-signup hooks (the activation mailer) share one
//!    transaction, so a failure anywhere leaves no partial account behind.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    hooks::NewUser,
    principal::optional_auth,
    state::AuthState,
    storage::{email_taken, insert_user, username_taken, InsertUserOutcome},
    types::{SignupForm, SignupRequest, SignupResponse},
    utils::{check_email, check_new_password, check_username, hash_password_blocking, normalize_email},
};
use crate::api::handlers::{
    notice::{FormErrors, Notice},
    profiles::{
        storage::{fetch_user_by_id, insert_profile},
        CleanProfile,
    },
};

const USERNAME_TAKEN: &str = "A user with that username already exists.";
const EMAIL_TAKEN: &str = "A user with that email address already exists.";
const SIGNUP_ACTIVE: &str = "Signup was successful. You can now proceed to log in.";
const SIGNUP_INACTIVE: &str =
    "Signup was successful. Activation is required before you can proceed to log in.";

/// Signup input after validation.
struct ValidSignup {
    username: String,
    email: String,
    password: String,
    profile: CleanProfile,
}

#[utoipa::path(
    get,
    path = "/v1/auth/signup",
    params(SignupForm),
    responses(
        (status = 200, description = "Initial signup form values.", body = SignupForm),
        (status = 303, description = "Already logged in, redirect to the login redirect URL."),
    ),
    tag = "auth"
)]
pub async fn signup_form(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Query(initial): Query<SignupForm>,
) -> impl IntoResponse {
    match optional_auth(&headers, &pool).await {
        Ok(Some(_)) => {
            Redirect::to(auth_state.config().login_redirect_url()).into_response()
        }
        Ok(None) => (StatusCode::OK, Json(initial)).into_response(),
        Err(status) => status.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created.", body = SignupResponse),
        (status = 303, description = "Already logged in, redirect to the login redirect URL."),
        (status = 400, description = "Invalid account or profile fields.", body = FormErrors),
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    match optional_auth(&headers, &pool).await {
        Ok(Some(_)) => {
            return Redirect::to(auth_state.config().login_redirect_url()).into_response();
        }
        Ok(None) => {}
        Err(status) => return status.into_response(),
    }

    let request = payload.map(|Json(request)| request).unwrap_or_default();

    let mut valid = match validate_signup(request) {
        Ok(valid) => valid,
        Err(errors) => return errors.into_response(),
    };

    // Uniqueness is checked up front for the error report; the unique indexes
    // still decide races below.
    let mut errors = FormErrors::new();
    match username_taken(&pool, &valid.username).await {
        Ok(true) => errors.add("username", USERNAME_TAKEN),
        Ok(false) => {}
        Err(err) => {
            error!("Failed to check username: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    match email_taken(&pool, &valid.email).await {
        Ok(true) => errors.add("email", EMAIL_TAKEN),
        Ok(false) => {}
        Err(err) => {
            error!("Failed to check email: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    if let Err(errors) = errors.into_result() {
        return errors.into_response();
    }

    let password = std::mem::take(&mut valid.password);
    let password_hash = match hash_password_blocking(password).await {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let config = auth_state.config();
    let is_active = !config.activation_required();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin signup transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = match insert_user(&mut tx, &valid.username, &valid.email, &password_hash, is_active)
        .await
    {
        Ok(InsertUserOutcome::Created(user_id)) => user_id,
        Ok(InsertUserOutcome::UsernameTaken) => {
            let _ = tx.rollback().await;
            let mut errors = FormErrors::new();
            errors.add("username", USERNAME_TAKEN);
            return errors.into_response();
        }
        Ok(InsertUserOutcome::EmailTaken) => {
            let _ = tx.rollback().await;
            let mut errors = FormErrors::new();
            errors.add("email", EMAIL_TAKEN);
            return errors.into_response();
        }
        Err(err) => {
            error!("Failed to create user: {err:#}");
            let _ = tx.rollback().await;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = insert_profile(&mut tx, user_id, &valid.profile).await {
        error!("Failed to create profile: {err:#}");
        let _ = tx.rollback().await;
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let new_user = NewUser {
        id: user_id,
        username: valid.username,
        email: valid.email,
        is_active,
    };
    if let Err(err) = auth_state.hooks().run(&mut tx, &new_user).await {
        error!("Signup rolled back: {err:#}");
        let _ = tx.rollback().await;
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit signup transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(user_id = %user_id, is_active, "user signed up");

    let user = match fetch_user_by_id(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(err) => {
            error!("Failed to load new user: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let notice = if is_active {
        Notice::success(SIGNUP_ACTIVE)
    } else {
        Notice::success(SIGNUP_INACTIVE)
    };
    let response = SignupResponse {
        user,
        notice,
        redirect: config.signup_success_url().to_string(),
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

/// Validate account and profile fields together.
fn validate_signup(request: SignupRequest) -> Result<ValidSignup, FormErrors> {
    let mut errors = FormErrors::new();

    let username = request.username.trim().to_string();
    check_username("username", &username, &mut errors);

    let email = normalize_email(&request.email);
    check_email("email", &email, &mut errors);

    check_new_password(
        "password1",
        &request.password1,
        "password2",
        &request.password2,
        &mut errors,
    );

    let profile = match request.profile.clean() {
        Ok(profile) => Some(profile),
        Err(profile_errors) => {
            errors.merge(profile_errors);
            None
        }
    };

    errors.into_result()?;

    Ok(ValidSignup {
        username,
        email,
        password: request.password1,
        profile: profile.unwrap_or_default(),
    })
}
