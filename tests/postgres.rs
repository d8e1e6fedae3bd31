//! Postgres-backed tests for signup, activation, sessions and profiles.
//!
//! Flow Overview:
//! 1. Create a throwaway database on the server named by
//!    `USER_PROFILES_TEST_DSN` and run the migrations.
//! 2. Drive the assembled router with real requests.
//! 3. Check both the responses and the rows left behind.
//!
//! Every test is skipped when `USER_PROFILES_TEST_DSN` is unset.

use anyhow::{anyhow, bail, Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        HeaderMap, Method, Request, StatusCode,
    },
    Router,
};
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, Connection, PgConnection, PgPool, Postgres, Transaction};
use std::{env, sync::Arc};
use tower::ServiceExt;
use ulid::Ulid;
use url::Url;
use user_profiles::api::{
    self,
    handlers::{
        activation::ActivationMailer,
        auth::{AuthConfig, AuthState, HookFuture, NewUser, PostSignupHook, SignupHooks},
        profiles::ProfileSettings,
    },
};
use uuid::Uuid;

const TEST_DSN_ENV: &str = "USER_PROFILES_TEST_DSN";
const FRONTEND: &str = "http://localhost:8080";
const PASSWORD: &str = "correct horse battery";

struct TestDb {
    admin_dsn: String,
    name: String,
    pool: PgPool,
}

impl TestDb {
    async fn create() -> Result<Option<Self>> {
        let Ok(admin_dsn) = env::var(TEST_DSN_ENV) else {
            return Ok(None);
        };

        let name = format!("user_profiles_test_{}", Ulid::new().to_string().to_lowercase());
        let mut admin = PgConnection::connect(&admin_dsn)
            .await
            .context("Failed to connect to the admin database")?;
        sqlx::query(&format!("CREATE DATABASE {name}"))
            .execute(&mut admin)
            .await?;
        admin.close().await?;

        let mut dsn = Url::parse(&admin_dsn)?;
        dsn.set_path(&name);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(dsn.as_str())
            .await
            .context("Failed to connect to the test database")?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Some(Self {
            admin_dsn,
            name,
            pool,
        }))
    }

    async fn drop_database(self) -> Result<()> {
        self.pool.close().await;
        let mut admin = PgConnection::connect(&self.admin_dsn).await?;
        sqlx::query(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", self.name))
            .execute(&mut admin)
            .await?;
        admin.close().await?;
        Ok(())
    }

    async fn count(&self, query: &str, user_id: Uuid) -> Result<i64> {
        Ok(sqlx::query_scalar(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?)
    }
}

macro_rules! test_db {
    () => {
        match TestDb::create().await? {
            Some(db) => db,
            None => {
                eprintln!("Skipping postgres test: {TEST_DSN_ENV} is not set");
                return Ok(());
            }
        }
    };
}

struct Refuse;

impl PostSignupHook for Refuse {
    fn name(&self) -> &'static str {
        "refuse"
    }

    fn on_signup<'a>(
        &'a self,
        _tx: &'a mut Transaction<'static, Postgres>,
        _user: &'a NewUser,
    ) -> HookFuture<'a> {
        Box::pin(async { Err(anyhow!("mail relay unavailable")) })
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

fn build_app(db: &TestDb, config: AuthConfig, hooks: SignupHooks) -> Result<Router> {
    let state = AuthState::new(config, ProfileSettings::new(), hooks);
    api::app(db.pool.clone(), Arc::new(state))
}

/// New accounts start inactive and get an activation email.
fn activation_app(db: &TestDb) -> Result<Router> {
    let hooks = SignupHooks::new().with(Arc::new(ActivationMailer::new(FRONTEND)));
    build_app(db, AuthConfig::new(FRONTEND.to_string()), hooks)
}

/// New accounts are active right away.
fn open_app(db: &TestDb) -> Result<Router> {
    let config = AuthConfig::new(FRONTEND.to_string()).with_activation_required(false);
    build_app(db, config, SignupHooks::new())
}

async fn send(app: &Router, request: Request<Body>) -> Result<Reply> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(Reply {
        status,
        headers,
        body,
    })
}

async fn post(app: &Router, uri: &str, session: Option<&str>, body: &Value) -> Result<Reply> {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = session {
        request = request.header(COOKIE, format!("user_profiles_session={token}"));
    }
    send(app, request.body(Body::from(serde_json::to_vec(body)?))?).await
}

async fn get(app: &Router, uri: &str, session: Option<&str>) -> Result<Reply> {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = session {
        request = request.header(COOKIE, format!("consent; user_profiles_session={token}"));
    }
    send(app, request.body(Body::empty())?).await
}

async fn signup(app: &Router, username: &str, email: &str) -> Result<Reply> {
    let body = json!({
        "username": username,
        "email": email,
        "password1": PASSWORD,
        "password2": PASSWORD,
        "display_name": username,
    });
    post(app, "/v1/auth/signup", None, &body).await
}

async fn signup_user(app: &Router, username: &str, email: &str) -> Result<Uuid> {
    let reply = signup(app, username, email).await?;
    if reply.status != StatusCode::CREATED {
        bail!("signup of {username} failed: {} {}", reply.status, reply.body);
    }
    let id = reply.body["user"]["id"]
        .as_str()
        .context("signup response without user id")?;
    Ok(Uuid::parse_str(id)?)
}

async fn login(app: &Router, username: &str, password: &str) -> Result<Reply> {
    let body = json!({ "username": username, "password": password });
    post(app, "/v1/auth/login", None, &body).await
}

/// Raw session token from the `Set-Cookie` header of a successful login.
fn session_token(reply: &Reply) -> Result<String> {
    let cookie = reply
        .headers
        .get(SET_COOKIE)
        .context("login did not set a cookie")?
        .to_str()?;
    let token = cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("user_profiles_session="))
        .context("unexpected session cookie")?;
    Ok(token.to_string())
}

async fn login_token(app: &Router, username: &str) -> Result<String> {
    let reply = login(app, username, PASSWORD).await?;
    if reply.status != StatusCode::OK {
        bail!("login of {username} failed: {} {}", reply.status, reply.body);
    }
    session_token(&reply)
}

fn non_field_errors(reply: &Reply) -> Value {
    reply.body["errors"]["non_field_errors"].clone()
}

#[tokio::test]
async fn activation_key_activates_once() -> Result<()> {
    let db = test_db!();
    let app = activation_app(&db)?;

    let reply = signup(&app, "alice", "alice@example.com").await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["user"]["is_active"], false);
    assert_eq!(
        reply.body["notice"]["message"],
        "Signup was successful. Activation is required before you can proceed to log in."
    );
    assert_eq!(reply.body["redirect"], "/v1/auth/login");

    let reply = login(&app, "alice", PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(non_field_errors(&reply), json!(["This account is inactive."]));

    let key: String = sqlx::query_scalar(
        "SELECT payload_json->>'activation_key' FROM email_outbox WHERE template = 'activation_created' AND to_email = $1",
    )
    .bind("alice@example.com")
    .fetch_one(&db.pool)
    .await?;
    assert_eq!(key.len(), 32);

    let reply = post(&app, "/v1/auth/activate", None, &json!({ "key": key })).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["notice"]["level"], "success");
    assert_eq!(
        reply.body["notice"]["message"],
        "Your account has been activated. You can now proceed to log in."
    );
    assert_eq!(reply.body["redirect"], "/v1/auth/login");

    let reply = post(&app, "/v1/auth/activate", None, &json!({ "key": key })).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(non_field_errors(&reply), json!(["Invalid activation key"]));

    let reply = login(&app, "alice", PASSWORD).await?;
    assert_eq!(reply.status, StatusCode::OK);

    db.drop_database().await
}

#[tokio::test]
async fn resend_reuses_the_pending_code() -> Result<()> {
    let db = test_db!();
    let app = activation_app(&db)?;

    let user_id = signup_user(&app, "alice", "alice@example.com").await?;

    let reply = post(
        &app,
        "/v1/auth/activation/resend",
        None,
        &json!({ "email": " Alice@Example.com " }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let codes = db
        .count("SELECT COUNT(*) FROM activation_codes WHERE user_id = $1", user_id)
        .await?;
    assert_eq!(codes, 1);

    let emails: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT template, payload_json->>'activation_key' FROM email_outbox WHERE to_email = $1 ORDER BY created_at",
    )
    .bind("alice@example.com")
    .fetch_all(&db.pool)
    .await?;
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].0, "activation_created");
    assert_eq!(emails[1].0, "activation_resend");
    assert_eq!(emails[0].1, emails[1].1);

    // Unknown addresses are accepted without queueing anything.
    let reply = post(
        &app,
        "/v1/auth/activation/resend",
        None,
        &json!({ "email": "nobody@example.com" }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_outbox")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(total, 2);

    db.drop_database().await
}

#[tokio::test]
async fn failing_signup_hook_rolls_back_everything() -> Result<()> {
    let db = test_db!();
    let hooks = SignupHooks::new()
        .with(Arc::new(ActivationMailer::new(FRONTEND)))
        .with(Arc::new(Refuse));
    let app = build_app(&db, AuthConfig::new(FRONTEND.to_string()), hooks)?;

    let reply = signup(&app, "alice", "alice@example.com").await?;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);

    for table in ["users", "user_profiles", "activation_codes", "email_outbox"] {
        let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await?;
        assert_eq!(rows, 0, "{table} kept rows after a failed signup");
    }

    db.drop_database().await
}

#[tokio::test]
async fn duplicate_username_or_email_is_rejected() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    signup_user(&app, "alice", "alice@example.com").await?;

    let reply = signup(&app, "ALICE", "other@example.com").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["errors"]["username"],
        json!(["A user with that username already exists."])
    );
    assert!(reply.body["errors"]["email"].is_null());

    let reply = signup(&app, "alice2", "Alice@Example.com").await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["errors"]["email"],
        json!(["A user with that email address already exists."])
    );

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(users, 1);

    db.drop_database().await
}

#[tokio::test]
async fn sessions_of_inactive_or_expired_users_do_not_resolve() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    let user_id = signup_user(&app, "alice", "alice@example.com").await?;
    let token = login_token(&app, "alice").await?;

    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["username"], "alice");

    let bearer = Request::builder()
        .uri("/v1/me")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let reply = send(&app, bearer).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["username"], "alice");

    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = get(&app, "/v1/me", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::OK);

    sqlx::query("UPDATE user_sessions SET expires_at = NOW() - INTERVAL '1 minute' WHERE user_id = $1")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    db.drop_database().await
}

#[tokio::test]
async fn logged_in_users_are_sent_away_from_signup() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    signup_user(&app, "alice", "alice@example.com").await?;
    let token = login_token(&app, "alice").await?;

    let reply = get(&app, "/v1/auth/signup", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(
        reply.headers.get(LOCATION).and_then(|value| value.to_str().ok()),
        Some("/v1/me")
    );

    let reply = post(&app, "/v1/auth/logout", Some(token.as_str()), &Value::Null).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["notice"]["message"], "You have been logged out.");
    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    db.drop_database().await
}

#[tokio::test]
async fn password_reset_token_is_single_use_and_revokes_sessions() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    let user_id = signup_user(&app, "alice", "alice@example.com").await?;
    let first = login_token(&app, "alice").await?;
    login_token(&app, "alice").await?;
    assert_eq!(
        db.count("SELECT COUNT(*) FROM user_sessions WHERE user_id = $1", user_id)
            .await?,
        2
    );

    let reply = post(
        &app,
        "/v1/auth/password-reset",
        None,
        &json!({ "email": "alice@example.com" }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reset_url: String = sqlx::query_scalar(
        "SELECT payload_json->>'reset_url' FROM email_outbox WHERE template = 'password_reset' AND to_email = $1",
    )
    .bind("alice@example.com")
    .fetch_one(&db.pool)
    .await?;
    let token = reset_url
        .strip_prefix(&format!("{FRONTEND}/reset/"))
        .context("unexpected reset url")?
        .to_string();

    let new_password = "staple battery horse";
    let confirm = json!({
        "token": token,
        "new_password1": new_password,
        "new_password2": new_password,
    });
    let reply = post(&app, "/v1/auth/password-reset/confirm", None, &confirm).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body["notice"]["message"],
        "Your password has been set. You may go ahead and log in now."
    );
    assert_eq!(
        db.count("SELECT COUNT(*) FROM user_sessions WHERE user_id = $1", user_id)
            .await?,
        0
    );
    let reply = get(&app, "/v1/auth/session", Some(first.as_str())).await?;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = post(&app, "/v1/auth/password-reset/confirm", None, &confirm).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(non_field_errors(&reply).is_array());

    assert_eq!(login(&app, "alice", PASSWORD).await?.status, StatusCode::BAD_REQUEST);
    assert_eq!(login(&app, "alice", new_password).await?.status, StatusCode::OK);

    db.drop_database().await
}

#[tokio::test]
async fn password_change_keeps_the_session() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    signup_user(&app, "alice", "alice@example.com").await?;
    let token = login_token(&app, "alice").await?;

    let wrong = json!({
        "old_password": "not my password",
        "new_password1": "staple battery horse",
        "new_password2": "staple battery horse",
    });
    let reply = post(&app, "/v1/me/password", Some(token.as_str()), &wrong).await?;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["errors"]["old_password"].is_array());

    let change = json!({
        "old_password": PASSWORD,
        "new_password1": "staple battery horse",
        "new_password2": "staple battery horse",
    });
    let reply = post(&app, "/v1/me/password", Some(token.as_str()), &change).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["redirect"], "/v1/me");

    let reply = get(&app, "/v1/auth/session", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::OK);

    db.drop_database().await
}

#[tokio::test]
async fn only_staff_edit_other_profiles() -> Result<()> {
    let db = test_db!();
    let app = open_app(&db)?;

    let alice = signup_user(&app, "alice", "alice@example.com").await?;
    let bob = signup_user(&app, "bob", "bob@example.com").await?;
    let token = login_token(&app, "bob").await?;
    let form = json!({ "display_name": "Alice A.", "website": "https://alice.example.com" });

    let reply = post(&app, "/v1/users/alice/profile", Some(token.as_str()), &form).await?;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    sqlx::query("UPDATE users SET is_staff = TRUE, can_change_users = TRUE WHERE id = $1")
        .bind(bob)
        .execute(&db.pool)
        .await?;

    let reply = post(&app, "/v1/users/alice/profile", Some(token.as_str()), &form).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["redirect"], "/v1/users/alice");
    assert_eq!(reply.body["notice"]["message"], "Your changes were saved.");

    let display_name: Option<String> =
        sqlx::query_scalar("SELECT display_name FROM user_profiles WHERE user_id = $1")
            .bind(alice)
            .fetch_one(&db.pool)
            .await?;
    assert_eq!(display_name.as_deref(), Some("Alice A."));

    let reply = post(
        &app,
        "/v1/users/bob/profile",
        Some(token.as_str()),
        &json!({ "display_name": "Bob" }),
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["redirect"], "/v1/me");

    // Staff may read private profiles too.
    let reply = get(&app, "/v1/users/alice", Some(token.as_str())).await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["profile"]["display_name"], "Alice A.");

    db.drop_database().await
}
