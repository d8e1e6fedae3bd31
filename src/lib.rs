//! # user-profiles
//!
//! Account registration, activation by email, login/logout and profile pages
//! served as a JSON API.
//!
//! ## Signup Flow
//!
//! A signup validates the account and profile fields together, then creates
//! the user and the profile in one transaction and runs the registered
//! post-signup hooks inside that same transaction. When activation is
//! required, the activation mailer hook issues an activation code and queues
//! the activation email through the outbox, and the account stays inactive
//! until the key is presented.
//!
//! ## Sessions
//!
//! Login stores a SHA-256 hash of a random token and hands the raw token to the
//! client in an `HttpOnly` cookie. Sessions of inactive users never resolve.
//!
//! ## Profiles
//!
//! Profiles are private by default. Public access can be opened to everyone or
//! only to authenticated users; staff with the change-user permission can
//! always read and edit them.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
