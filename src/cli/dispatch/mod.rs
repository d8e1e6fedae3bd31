//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run, currently only the API
//! server with its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, email, profiles, ARG_DSN, ARG_PORT};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let profile_opts = profiles::Options::parse(matches)?;
    let email_opts = email::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        password_reset_ttl_seconds: auth_opts.password_reset_ttl_seconds,
        activation_required: auth_opts.activation_required,
        login_redirect_url: auth_opts.login_redirect_url,
        signup_success_url: auth_opts.signup_success_url,
        public_profiles: profile_opts.public,
        public_profiles_when_logged_in: profile_opts.public_when_logged_in,
        profile_url_field: profile_opts.url_field,
        email_outbox_poll_seconds: email_opts.outbox.poll_seconds,
        email_outbox_batch_size: email_opts.outbox.batch_size,
        email_outbox_max_attempts: email_opts.outbox.max_attempts,
        email_outbox_backoff_base_seconds: email_opts.outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: email_opts.outbox.backoff_max_seconds,
        email_webhook_url: email_opts.webhook_url,
        email_webhook_token: email_opts.webhook_token,
    }))
}
