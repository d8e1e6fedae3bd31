//! Auth configuration and the shared state handed to handlers.

use super::hooks::SignupHooks;
use crate::api::{handlers::profiles::ProfileSettings, paths};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: i64 = 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    password_reset_ttl_seconds: i64,
    activation_required: bool,
    login_redirect_url: String,
    signup_success_url: Option<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            activation_required: true,
            login_redirect_url: paths::CURRENT_USER_DETAIL.to_string(),
            signup_success_url: None,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.password_reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_activation_required(mut self, required: bool) -> Self {
        self.activation_required = required;
        self
    }

    #[must_use]
    pub fn with_login_redirect_url(mut self, url: String) -> Self {
        self.login_redirect_url = url;
        self
    }

    #[must_use]
    pub fn with_signup_success_url(mut self, url: Option<String>) -> Self {
        self.signup_success_url = url;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn password_reset_ttl_seconds(&self) -> i64 {
        self.password_reset_ttl_seconds
    }

    #[must_use]
    pub fn activation_required(&self) -> bool {
        self.activation_required
    }

    /// Where to send a user after login, or when an authenticated user opens signup.
    #[must_use]
    pub fn login_redirect_url(&self) -> &str {
        &self.login_redirect_url
    }

    /// Where to send a user after signup, the login page unless configured.
    #[must_use]
    pub fn signup_success_url(&self) -> &str {
        self.signup_success_url.as_deref().unwrap_or(paths::LOGIN)
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// State shared by the account and profile handlers.
pub struct AuthState {
    config: AuthConfig,
    profiles: ProfileSettings,
    hooks: SignupHooks,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, profiles: ProfileSettings, hooks: SignupHooks) -> Self {
        Self {
            config,
            profiles,
            hooks,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileSettings {
        &self.profiles
    }

    #[must_use]
    pub fn hooks(&self) -> &SignupHooks {
        &self.hooks
    }
}
