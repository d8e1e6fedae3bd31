//! Profile visibility and URL lookup settings.

use anyhow::anyhow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::types::UserView;
use crate::api::handlers::auth::principal::Principal;

/// User field a public profile URL is looked up by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UrlField {
    #[default]
    Username,
    Id,
    Email,
}

/// A parsed profile URL value, ready to be matched against its column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Username(String),
    Id(Uuid),
    Email(String),
}

impl UrlField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Id => "id",
            Self::Email => "email",
        }
    }

    /// Parse a raw path value for this field. `None` means no user can match.
    #[must_use]
    pub fn parse_lookup(self, value: &str) -> Option<Lookup> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match self {
            Self::Username => Some(Lookup::Username(value.to_string())),
            Self::Id => Uuid::parse_str(value).ok().map(Lookup::Id),
            Self::Email => Some(Lookup::Email(value.to_lowercase())),
        }
    }

    /// The value of this field for `user`, as used in detail URLs.
    #[must_use]
    pub fn value_of(self, user: &UserView) -> String {
        match self {
            Self::Username => user.username.clone(),
            Self::Id => user.id.clone(),
            Self::Email => user.email.clone(),
        }
    }
}

impl fmt::Display for UrlField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrlField {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "username" => Ok(Self::Username),
            "id" | "pk" => Ok(Self::Id),
            "email" => Ok(Self::Email),
            other => Err(anyhow!("unsupported profile URL field: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProfileSettings {
    public: bool,
    public_when_logged_in: bool,
    url_field: UrlField,
}

impl ProfileSettings {
    /// Private profiles looked up by username.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    #[must_use]
    pub fn with_public_when_logged_in(mut self, public_when_logged_in: bool) -> Self {
        self.public_when_logged_in = public_when_logged_in;
        self
    }

    #[must_use]
    pub fn with_url_field(mut self, url_field: UrlField) -> Self {
        self.url_field = url_field;
        self
    }

    #[must_use]
    pub fn url_field(&self) -> UrlField {
        self.url_field
    }

    /// Whether `viewer` may read other users' profiles.
    #[must_use]
    pub fn can_view(&self, viewer: Option<&Principal>) -> bool {
        if self.public {
            return true;
        }
        match viewer {
            Some(principal) => self.public_when_logged_in || principal.can_change_users(),
            None => false,
        }
    }
}
