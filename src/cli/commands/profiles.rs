use anyhow::{Context, Result};
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};

use crate::api::handlers::profiles::UrlField;

pub const ARG_PUBLIC_PROFILES: &str = "public-profiles";
pub const ARG_PUBLIC_PROFILES_WHEN_LOGGED_IN: &str = "public-profiles-when-logged-in";
pub const ARG_PROFILE_URL_FIELD: &str = "profile-url-field";

#[derive(Debug, Clone)]
pub struct Options {
    pub public: bool,
    pub public_when_logged_in: bool,
    pub url_field: UrlField,
}

impl Options {
    /// Parse profile visibility arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the URL field is not one of `username`, `id` or `email`.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url_field = matches
            .get_one::<String>(ARG_PROFILE_URL_FIELD)
            .map_or("username", String::as_str)
            .parse::<UrlField>()
            .context("invalid --profile-url-field")?;

        Ok(Self {
            public: matches
                .get_one::<bool>(ARG_PUBLIC_PROFILES)
                .copied()
                .unwrap_or(false),
            public_when_logged_in: matches
                .get_one::<bool>(ARG_PUBLIC_PROFILES_WHEN_LOGGED_IN)
                .copied()
                .unwrap_or(false),
            url_field,
        })
    }
}

fn bool_flag(name: &'static str, help: &'static str, env: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .num_args(0..=1)
        .default_value("false")
        .default_missing_value("true")
        .action(ArgAction::Set)
        .value_parser(BoolishValueParser::new())
}

pub fn with_args(command: Command) -> Command {
    command
        .arg(bool_flag(
            ARG_PUBLIC_PROFILES,
            "Make profile detail pages readable by anyone",
            "USER_PROFILES_PUBLIC",
        ))
        .arg(bool_flag(
            ARG_PUBLIC_PROFILES_WHEN_LOGGED_IN,
            "Make profile detail pages readable by any logged-in user",
            "USER_PROFILES_PUBLIC_WHEN_LOGGED_IN",
        ))
        .arg(
            Arg::new(ARG_PROFILE_URL_FIELD)
                .long(ARG_PROFILE_URL_FIELD)
                .help("User field used to look up profiles by URL")
                .env("USER_PROFILES_URL_FIELD")
                .default_value("username")
                .value_parser(["username", "id", "email"]),
        )
}
