//! Profile pages: detail views and profile editing.
//!
//! Profiles are private by default. [`ProfileSettings`] opens them to everyone
//! or to authenticated users only, and picks the user field that detail URLs
//! are keyed by.

pub mod change;
pub mod detail;
mod settings;
pub(crate) mod storage;
mod types;

pub use settings::{Lookup, ProfileSettings, UrlField};
pub use types::{
    CleanProfile, ProfileChangeResponse, ProfileForm, ProfileView, UserDetailResponse, UserView,
};
