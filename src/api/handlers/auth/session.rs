//! Login, logout and session endpoints for cookie and bearer auth.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    state::{AuthConfig, AuthState},
    storage::{
        delete_session, insert_session, lookup_credentials, lookup_session, record_login,
        SessionRecord,
    },
    types::{LoginRequest, LoginResponse, SessionResponse},
    utils::{hash_token, verify_password_blocking},
};
use crate::api::{
    handlers::notice::{ActionResponse, FormErrors, Notice},
    paths,
};

pub(crate) const SESSION_COOKIE_NAME: &str = "user_profiles_session";

const INVALID_LOGIN: &str = "Please enter a correct username and password.";
const INACTIVE_ACCOUNT: &str = "This account is inactive.";

impl From<SessionRecord> for SessionResponse {
    fn from(record: SessionRecord) -> Self {
        Self {
            user_id: record.user_id.to_string(),
            username: record.username,
            email: record.email,
            is_staff: record.is_staff,
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    match authenticate_session(&headers, &pool).await {
        Ok(Some(record)) => (StatusCode::OK, Json(SessionResponse::from(record))).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(status) => status.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = LoginResponse),
        (status = 400, description = "Missing fields or wrong credentials", body = FormErrors),
        (status = 403, description = "Account is not active", body = FormErrors),
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return FormErrors::non_field(INVALID_LOGIN).into_response();
    };

    let login_name = request.username.trim();
    let mut errors = FormErrors::new();
    if login_name.is_empty() {
        errors.add("username", "This field is required.");
    }
    if request.password.is_empty() {
        errors.add("password", "This field is required.");
    }
    if let Err(errors) = errors.into_result() {
        return errors.into_response();
    }

    let record = match lookup_credentials(&pool, login_name).await {
        Ok(Some(record)) => record,
        Ok(None) => return FormErrors::non_field(INVALID_LOGIN).into_response(),
        Err(err) => {
            error!("Failed to lookup credentials: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match verify_password_blocking(request.password, record.password_hash).await {
        Ok(true) => {}
        Ok(false) => return FormErrors::non_field(INVALID_LOGIN).into_response(),
        Err(err) => {
            error!("Failed to verify password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if !record.is_active {
        return (StatusCode::FORBIDDEN, Json(FormErrors::non_field(INACTIVE_ACCOUNT)))
            .into_response();
    }

    let config = auth_state.config();
    let token = match insert_session(&pool, record.user_id, config.session_ttl_seconds()).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = record_login(&pool, record.user_id).await {
        error!("Failed to record login: {err:#}");
    }

    let session = match lookup_session(&pool, &hash_token(&token)).await {
        Ok(Some(session)) => session,
        Ok(None) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Err(err) => {
            error!("Failed to load new session: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = match session_cookie(config, &token) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(user_id = %record.user_id, "user logged in");

    let redirect = safe_next(request.next.as_deref())
        .unwrap_or_else(|| config.login_redirect_url())
        .to_string();
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    (
        StatusCode::OK,
        headers,
        Json(LoginResponse {
            session: session.into(),
            redirect,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = ActionResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = delete_session(&pool, &hash_token(&token)).await {
            error!("Failed to delete session: {err:#}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    let body = ActionResponse::new(Notice::info("You have been logged out."), paths::LOGIN);
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

/// Resolve the request session into a session record, if present.
///
/// Returns `Ok(None)` when no token was sent or it does not match a live session.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    match lookup_session(pool, &hash_token(&token)).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Only same-site absolute paths are followed after login.
fn safe_next(next: Option<&str>) -> Option<&str> {
    next.map(str::trim)
        .filter(|next| next.starts_with('/') && !next.starts_with("//") && !next.contains('\\'))
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        // Flag cookies carry no value.
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let val = val.trim();
        if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{auth::hooks::SignupHooks, profiles::ProfileSettings};
    use axum::{body::to_bytes, http::header::COOKIE};
    use sqlx::postgres::PgPoolOptions;

    fn auth_state(frontend: &str) -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new(frontend.to_string()).with_session_ttl_seconds(60),
            ProfileSettings::new(),
            SignupHooks::new(),
        ))
    }

    fn lazy_pool() -> anyhow::Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[test]
    fn extract_session_token_reads_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; user_profiles_session=abc123; other=1"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn extract_session_token_skips_cookies_without_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("consent; user_profiles_session=abc123"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn extract_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        headers.insert(COOKIE, HeaderValue::from_static("user_profiles_session=abc"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn extract_session_token_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        headers.insert(COOKIE, HeaderValue::from_static("user_profiles_session="));
        assert!(extract_session_token(&headers).is_none());
    }

    #[test]
    fn session_cookie_flags() -> anyhow::Result<()> {
        let state = auth_state("https://accounts.example.com");
        let cookie = session_cookie(state.config(), "tok")?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("user_profiles_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.ends_with("; Secure"));

        let plain = auth_state("http://localhost:8080");
        let cleared = clear_session_cookie(plain.config())?;
        let cleared = cleared.to_str()?;
        assert!(cleared.contains("Max-Age=0"));
        assert!(!cleared.contains("Secure"));
        Ok(())
    }

    #[test]
    fn safe_next_rejects_offsite_targets() {
        assert_eq!(safe_next(Some("/v1/me")), Some("/v1/me"));
        assert_eq!(safe_next(Some("//evil.example.com")), None);
        assert_eq!(safe_next(Some("https://evil.example.com")), None);
        assert_eq!(safe_next(Some("/\\evil")), None);
        assert_eq!(safe_next(None), None);
    }

    #[tokio::test]
    async fn login_requires_both_fields() -> anyhow::Result<()> {
        let request = LoginRequest {
            username: " ".to_string(),
            password: String::new(),
            next: None,
        };
        let response = login(
            Extension(lazy_pool()?),
            Extension(auth_state("http://localhost:8080")),
            Some(Json(request)),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let errors: FormErrors = serde_json::from_slice(&body)?;
        assert!(errors.field("username").is_some());
        assert!(errors.field("password").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn session_without_token_is_no_content() -> anyhow::Result<()> {
        let response = session(HeaderMap::new(), Extension(lazy_pool()?))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn logout_without_session_clears_cookie() -> anyhow::Result<()> {
        let response = logout(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state("http://localhost:8080")),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(cookie.contains("Max-Age=0"));

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let action: ActionResponse = serde_json::from_slice(&body)?;
        assert_eq!(action.notice, Notice::info("You have been logged out."));
        assert_eq!(action.redirect.as_deref(), Some(paths::LOGIN));
        Ok(())
    }
}
