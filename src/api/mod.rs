use crate::api::handlers::{
    activation::ActivationMailer,
    auth::{AuthConfig, AuthState, SignupHooks},
    health,
    profiles::ProfileSettings,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension, Json, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email;
pub mod handlers;
pub mod paths;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    profile_settings: ProfileSettings,
    email_config: email::EmailWorkerConfig,
    email_sender: Arc<dyn email::EmailSender>,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let hooks = signup_hooks(&auth_config);
    info!(hooks = ?hooks, "post-signup hooks registered");
    let auth_state = Arc::new(AuthState::new(auth_config, profile_settings, hooks));

    // Background worker polls email_outbox for pending rows, hands them to the
    // sender and retries failures with exponential backoff.
    email::spawn_outbox_worker(pool.clone(), email_sender, email_config);

    let app = app(pool, auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// The activation mailer only runs when new accounts start inactive.
fn signup_hooks(auth_config: &AuthConfig) -> SignupHooks {
    let hooks = SignupHooks::new();
    if auth_config.activation_required() {
        hooks.with(Arc::new(ActivationMailer::new(
            auth_config.frontend_base_url(),
        )))
    } else {
        hooks
    }
}

/// Assemble the HTTP application around an existing pool and auth state.
///
/// # Errors
/// Returns an error if the frontend base URL cannot be turned into a CORS origin.
pub fn app(pool: PgPool, auth_state: Arc<AuthState>) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Documented routes come from openapi.rs; `/openapi.json` and the
    // preflight-only `OPTIONS /health` are added here and stay undocumented.
    let (router, openapi) = router().split_for_parts();
    let openapi = Arc::new(openapi);

    let app = router
        .route(
            "/openapi.json",
            get(move || {
                let openapi = Arc::clone(&openapi);
                async move { Json(openapi.as_ref().clone()) }
            }),
        )
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_keeps_scheme_host_and_port() -> Result<()> {
        assert_eq!(
            frontend_origin("https://app.example.com/some/path")?,
            HeaderValue::from_static("https://app.example.com")
        );
        assert_eq!(
            frontend_origin("http://localhost:8080")?,
            HeaderValue::from_static("http://localhost:8080")
        );
        assert!(frontend_origin("not a url").is_err());
        Ok(())
    }

    #[test]
    fn activation_mailer_follows_activation_setting() {
        let required = AuthConfig::new("http://localhost:8080".to_string());
        assert_eq!(signup_hooks(&required).names(), vec!["activation_mailer"]);

        let optional = required.with_activation_required(false);
        assert!(signup_hooks(&optional).is_empty());
    }
}
