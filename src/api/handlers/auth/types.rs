use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::handlers::{
    notice::Notice,
    profiles::{ProfileForm, UserView},
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email address.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Local path to continue to after login.
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub session: SessionResponse,
    pub redirect: String,
}

/// Account and profile fields submitted together.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SignupRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
    #[serde(flatten)]
    pub profile: ProfileForm,
}

/// Initial signup form values, prefilled from the query string.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SignupForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignupResponse {
    pub user: UserView,
    pub notice: Notice,
    pub redirect: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password1: String,
    #[serde(default)]
    pub new_password2: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetConfirmRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password1: String,
    #[serde(default)]
    pub new_password2: String,
}
