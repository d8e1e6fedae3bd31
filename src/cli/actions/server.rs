use crate::{
    api::{
        self,
        email::{EmailSender, EmailWorkerConfig, LogEmailSender, WebhookEmailSender},
        handlers::{auth::AuthConfig, profiles::ProfileSettings, profiles::UrlField},
    },
    cli::telemetry,
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
    pub activation_required: bool,
    pub login_redirect_url: String,
    pub signup_success_url: Option<String>,
    pub public_profiles: bool,
    pub public_profiles_when_logged_in: bool,
    pub profile_url_field: UrlField,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
    pub email_webhook_url: Option<String>,
    pub email_webhook_token: Option<SecretString>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the email sender cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_password_reset_ttl_seconds(args.password_reset_ttl_seconds)
        .with_activation_required(args.activation_required)
        .with_login_redirect_url(args.login_redirect_url)
        .with_signup_success_url(args.signup_success_url);

    let profile_settings = ProfileSettings::new()
        .with_public(args.public_profiles)
        .with_public_when_logged_in(args.public_profiles_when_logged_in)
        .with_url_field(args.profile_url_field);

    let email_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    let email_sender: Arc<dyn EmailSender> = match args.email_webhook_url {
        Some(url) => {
            info!("Delivering email through webhook");
            Arc::new(WebhookEmailSender::new(&url, args.email_webhook_token)?)
        }
        None => {
            info!("No email webhook configured, outbound email is logged only");
            Arc::new(LogEmailSender)
        }
    };

    let result = api::new(
        args.port,
        args.dsn,
        auth_config,
        profile_settings,
        email_config,
        email_sender,
    )
    .await;

    telemetry::shutdown_tracer();

    result
}
