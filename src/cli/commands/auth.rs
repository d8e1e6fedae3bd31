use anyhow::{Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";
pub const ARG_ACTIVATION_REQUIRED: &str = "activation-required";
pub const ARG_LOGIN_REDIRECT_URL: &str = "login-redirect-url";
pub const ARG_SIGNUP_SUCCESS_URL: &str = "signup-success-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
    pub activation_required: bool,
    pub login_redirect_url: String,
    pub signup_success_url: Option<String>,
}

impl Options {
    /// Parse signup, session and activation arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .context("missing required argument: --session-ttl-seconds")?,
            password_reset_ttl_seconds: matches
                .get_one::<i64>(ARG_PASSWORD_RESET_TTL_SECONDS)
                .copied()
                .context("missing required argument: --password-reset-ttl-seconds")?,
            activation_required: matches
                .get_one::<bool>(ARG_ACTIVATION_REQUIRED)
                .copied()
                .unwrap_or(true),
            login_redirect_url: matches
                .get_one::<String>(ARG_LOGIN_REDIRECT_URL)
                .cloned()
                .context("missing required argument: --login-redirect-url")?,
            signup_success_url: matches
                .get_one::<String>(ARG_SIGNUP_SUCCESS_URL)
                .cloned()
                .filter(|value| !value.trim().is_empty()),
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_signup_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for activation and password reset links")
                .env("USER_PROFILES_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("USER_PROFILES_SESSION_TTL_SECONDS")
                .default_value("1209600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Password reset link TTL in seconds")
                .env("USER_PROFILES_PASSWORD_RESET_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_REDIRECT_URL)
                .long(ARG_LOGIN_REDIRECT_URL)
                .help("Where to send users after login, or when an authenticated user hits signup")
                .env("USER_PROFILES_LOGIN_REDIRECT_URL")
                .default_value("/v1/me"),
        )
}

fn with_signup_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACTIVATION_REQUIRED)
                .long(ARG_ACTIVATION_REQUIRED)
                .help("Require new accounts to be activated by email before login")
                .env("USER_PROFILES_ACTIVATION_REQUIRED")
                .num_args(0..=1)
                .default_value("true")
                .default_missing_value("true")
                .action(ArgAction::Set)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SIGNUP_SUCCESS_URL)
                .long(ARG_SIGNUP_SUCCESS_URL)
                .help("Redirect after a successful signup (defaults to the login endpoint)")
                .env("USER_PROFILES_SIGNUP_SUCCESS_URL"),
        )
}
