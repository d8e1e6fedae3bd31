use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_EMAIL_OUTBOX_POLL_SECONDS: &str = "email-outbox-poll-seconds";
pub const ARG_EMAIL_OUTBOX_BATCH_SIZE: &str = "email-outbox-batch-size";
pub const ARG_EMAIL_OUTBOX_MAX_ATTEMPTS: &str = "email-outbox-max-attempts";
pub const ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS: &str = "email-outbox-backoff-base-seconds";
pub const ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS: &str = "email-outbox-backoff-max-seconds";
pub const ARG_EMAIL_WEBHOOK_URL: &str = "email-webhook-url";
pub const ARG_EMAIL_WEBHOOK_TOKEN: &str = "email-webhook-token";

#[derive(Debug, Clone)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub outbox: OutboxOptions,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
}

impl Options {
    /// Parse email outbox and delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let outbox = OutboxOptions {
            poll_seconds: matches
                .get_one::<u64>(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .copied()
                .context("missing required argument: --email-outbox-poll-seconds")?,
            batch_size: matches
                .get_one::<usize>(ARG_EMAIL_OUTBOX_BATCH_SIZE)
                .copied()
                .context("missing required argument: --email-outbox-batch-size")?,
            max_attempts: matches
                .get_one::<u32>(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .copied()
                .context("missing required argument: --email-outbox-max-attempts")?,
            backoff_base_seconds: matches
                .get_one::<u64>(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .copied()
                .context("missing required argument: --email-outbox-backoff-base-seconds")?,
            backoff_max_seconds: matches
                .get_one::<u64>(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .copied()
                .context("missing required argument: --email-outbox-backoff-max-seconds")?,
        };

        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            outbox,
            webhook_url: get_non_empty(ARG_EMAIL_WEBHOOK_URL),
            webhook_token: get_non_empty(ARG_EMAIL_WEBHOOK_TOKEN).map(SecretString::from),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_outbox_args(command);
    with_delivery_args(command)
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .long(ARG_EMAIL_OUTBOX_POLL_SECONDS)
                .help("Email outbox poll interval in seconds")
                .env("USER_PROFILES_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BATCH_SIZE)
                .long(ARG_EMAIL_OUTBOX_BATCH_SIZE)
                .help("Email outbox batch size per poll")
                .env("USER_PROFILES_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .help("Max attempts before marking an email as failed")
                .env("USER_PROFILES_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .help("Base delay for email outbox retry backoff")
                .env("USER_PROFILES_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .help("Max delay for email outbox retry backoff")
                .env("USER_PROFILES_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_delivery_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_URL)
                .long(ARG_EMAIL_WEBHOOK_URL)
                .help("Deliver outbound email by POSTing JSON to this URL (logs only when unset)")
                .env("USER_PROFILES_EMAIL_WEBHOOK_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_WEBHOOK_TOKEN)
                .long(ARG_EMAIL_WEBHOOK_TOKEN)
                .help("Bearer token sent to the email webhook")
                .env("USER_PROFILES_EMAIL_WEBHOOK_TOKEN")
                .hide_env_values(true),
        )
}
