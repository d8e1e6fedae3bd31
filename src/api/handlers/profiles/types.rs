use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::api::handlers::notice::{FormErrors, Notice};

pub(crate) const MAX_DISPLAY_NAME_LENGTH: usize = 100;
pub(crate) const MAX_LOCATION_LENGTH: usize = 100;
pub(crate) const MAX_BIO_LENGTH: usize = 1000;

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: String,
    pub last_login: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfileView {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserDetailResponse {
    pub user: UserView,
    pub profile: ProfileView,
}

/// Editable profile fields as submitted.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfileForm {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// Profile fields after validation. Blank input is `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanProfile {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileChangeResponse {
    pub profile: ProfileView,
    pub notice: Notice,
    pub redirect: String,
}

impl ProfileForm {
    /// Validate every field, collecting all errors.
    ///
    /// # Errors
    /// Returns the field errors when any value is out of bounds.
    pub fn clean(&self) -> Result<CleanProfile, FormErrors> {
        let mut errors = FormErrors::new();

        let display_name = normalize_optional(self.display_name.as_deref());
        check_length(
            "display_name",
            display_name.as_deref(),
            MAX_DISPLAY_NAME_LENGTH,
            &mut errors,
        );

        let location = normalize_optional(self.location.as_deref());
        check_length("location", location.as_deref(), MAX_LOCATION_LENGTH, &mut errors);

        let bio = normalize_optional(self.bio.as_deref());
        check_length("bio", bio.as_deref(), MAX_BIO_LENGTH, &mut errors);

        let website = normalize_optional(self.website.as_deref());
        if let Some(website) = website.as_deref() {
            let valid = Url::parse(website)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
            if !valid {
                errors.add("website", "Enter a valid URL.");
            }
        }

        errors.into_result()?;

        Ok(CleanProfile {
            display_name,
            bio,
            location,
            website,
        })
    }
}

impl From<&ProfileView> for ProfileForm {
    fn from(view: &ProfileView) -> Self {
        Self {
            display_name: view.display_name.clone(),
            bio: view.bio.clone(),
            location: view.location.clone(),
            website: view.website.clone(),
        }
    }
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn check_length(field: &str, value: Option<&str>, max: usize, errors: &mut FormErrors) {
    if let Some(value) = value {
        let length = value.chars().count();
        if length > max {
            errors.add(
                field,
                format!(
                    "Ensure this value has at most {max} characters (it has {length})."
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_turns_blank_into_none() {
        let form = ProfileForm {
            display_name: Some("  ".to_string()),
            bio: Some(String::new()),
            location: None,
            website: Some(" ".to_string()),
        };
        assert_eq!(form.clean(), Ok(CleanProfile::default()));
    }

    #[test]
    fn clean_trims_values() {
        let form = ProfileForm {
            display_name: Some(" Alice ".to_string()),
            website: Some("https://alice.example.com/".to_string()),
            ..ProfileForm::default()
        };
        let clean = form.clean();
        assert!(clean.is_ok());
        if let Ok(clean) = clean {
            assert_eq!(clean.display_name.as_deref(), Some("Alice"));
            assert_eq!(clean.website.as_deref(), Some("https://alice.example.com/"));
        }
    }

    #[test]
    fn clean_collects_every_error() {
        let form = ProfileForm {
            display_name: Some("x".repeat(101)),
            bio: Some("y".repeat(1001)),
            location: Some("z".repeat(101)),
            website: Some("ftp://files.example.com".to_string()),
        };
        let Err(errors) = form.clean() else {
            panic!("expected validation errors");
        };
        for field in ["display_name", "bio", "location", "website"] {
            assert!(errors.field(field).is_some(), "missing error for {field}");
        }
    }

    #[test]
    fn clean_rejects_relative_website() {
        let form = ProfileForm {
            website: Some("alice.example.com".to_string()),
            ..ProfileForm::default()
        };
        assert!(form.clean().is_err());
    }

    #[test]
    fn limits_are_inclusive() {
        let form = ProfileForm {
            display_name: Some("x".repeat(MAX_DISPLAY_NAME_LENGTH)),
            bio: Some("y".repeat(MAX_BIO_LENGTH)),
            ..ProfileForm::default()
        };
        assert!(form.clean().is_ok());
    }
}
