//! User-facing messages attached to responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Error key for messages not tied to a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Outcome of a state-changing request: what to tell the user and where to go next.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionResponse {
    pub notice: Notice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl ActionResponse {
    #[must_use]
    pub fn new(notice: Notice, redirect: impl Into<String>) -> Self {
        Self {
            notice,
            redirect: Some(redirect.into()),
        }
    }
}

/// Validation errors keyed by field name, returned with `400 Bad Request`.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FormErrors {
    pub errors: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
}

impl FormErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single non-field error, e.g. a failed login.
    #[must_use]
    pub fn non_field(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(NON_FIELD_ERRORS, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: Self) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    #[must_use]
    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when no field failed.
    ///
    /// # Errors
    /// Returns `self` when at least one error was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl IntoResponse for FormErrors {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_errors_collect_per_field() {
        let mut errors = FormErrors::new();
        assert!(errors.is_empty());
        errors.add("username", "This field is required.");
        errors.add("username", "Enter a valid username.");
        errors.add("email", "Enter a valid email address.");

        assert_eq!(errors.field("username").map(<[String]>::len), Some(2));
        assert_eq!(errors.field("email").map(<[String]>::len), Some(1));
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn merge_appends_messages() {
        let mut left = FormErrors::non_field("first");
        let right = FormErrors::non_field("second");
        left.merge(right);
        assert_eq!(
            left.field(NON_FIELD_ERRORS),
            Some(["first".to_string(), "second".to_string()].as_slice())
        );
    }

    #[test]
    fn notice_serializes_lowercase_level() -> anyhow::Result<()> {
        let value = serde_json::to_value(Notice::success("Your changes were saved."))?;
        assert_eq!(value["level"], "success");
        assert_eq!(value["message"], "Your changes were saved.");
        Ok(())
    }

    #[test]
    fn action_response_skips_missing_redirect() -> anyhow::Result<()> {
        let response = ActionResponse {
            notice: Notice::info("hi"),
            redirect: None,
        };
        let value = serde_json::to_value(response)?;
        assert!(value.get("redirect").is_none());
        Ok(())
    }
}
