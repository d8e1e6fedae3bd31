//! Route paths used as redirect targets.

pub const LOGIN: &str = "/v1/auth/login";
pub const CURRENT_USER_DETAIL: &str = "/v1/me";

/// Detail path of a user, `lookup` being the value of the configured URL field.
#[must_use]
pub fn user_detail(lookup: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(lookup.as_bytes()).collect();
    format!("/v1/users/{encoded}")
}
