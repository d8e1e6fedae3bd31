use super::handlers::{activation, auth, health, profiles};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Endpoints registered here via `.routes(routes!(...))` are both served and
/// documented. Routes added in `api::app` (like `OPTIONS /health`) are not.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::session::session))
        .routes(routes!(auth::session::login))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::signup::signup_form, auth::signup::signup))
        .routes(routes!(auth::password::change_password))
        .routes(routes!(auth::password::request_password_reset))
        .routes(routes!(auth::password::confirm_password_reset))
        .routes(routes!(activation::routes::activate))
        .routes(routes!(activation::routes::resend_activation))
        .routes(routes!(profiles::detail::current_user_detail))
        .routes(routes!(profiles::detail::redirect_to_current_user_detail))
        .routes(routes!(profiles::detail::user_detail))
        .routes(routes!(
            profiles::change::current_profile_form,
            profiles::change::change_current_profile
        ))
        .routes(routes!(
            profiles::change::user_profile_form,
            profiles::change::change_user_profile
        ));

    let mut app_tag = Tag::new("user-profiles");
    app_tag.description = Some("User registration, activation and profiles API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Signup, activation, sessions and passwords".to_string());

    let mut profiles_tag = Tag::new("profiles");
    profiles_tag.description = Some("Profile detail and editing".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Service and database health".to_string());

    router.get_openapi_mut().tags = Some(vec![app_tag, auth_tag, profiles_tag, health_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (non_empty(name), non_empty(email))
        }
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::paths;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team User Profiles"));
            assert_eq!(contact.email.as_deref(), Some("team@user-profiles.dev"));
        }

        let license = doc.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let doc = openapi();
        let tags = doc.tags.clone().unwrap_or_default();
        for name in ["user-profiles", "auth", "profiles", "health"] {
            assert!(tags.iter().any(|tag| tag.name == name), "missing tag {name}");
        }
        for path in [
            "/health",
            "/v1/auth/signup",
            "/v1/auth/activate",
            "/v1/auth/activation/resend",
            paths::LOGIN,
            "/v1/auth/logout",
            paths::CURRENT_USER_DETAIL,
            "/v1/me/profile",
            "/v1/profile",
            "/v1/users/{lookup}",
            "/v1/users/{lookup}/profile",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing path {path}");
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Jane Doe <jane@example.com>"),
            (Some("Jane Doe"), Some("jane@example.com"))
        );
        assert_eq!(parse_author("Jane Doe"), (Some("Jane Doe"), None));
        assert_eq!(parse_author("<jane@example.com>"), (None, Some("jane@example.com")));
    }
}
