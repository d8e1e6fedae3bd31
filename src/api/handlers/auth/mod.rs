//! Account handlers and supporting modules.
//!
//! This module covers signup, login/logout, cookie or bearer sessions and
//! password management.
//!
//! ## Sessions
//!
//! Session tokens are 32 random bytes, base64url encoded for the client. Only
//! the SHA-256 hash of a token is stored, so a database dump cannot be replayed.
//!
//! ## Post-signup Hooks
//!
//! Hooks registered in [`SignupHooks`] run inside the signup transaction. A
//! failing hook rolls back the new user together with its profile.

pub(crate) mod hooks;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod session;
pub(crate) mod signup;
mod state;
mod storage;
pub(crate) mod types;
pub(crate) mod utils;

pub use hooks::{HookFuture, NewUser, PostSignupHook, SignupHooks};
pub use principal::Principal;
pub use state::{AuthConfig, AuthState};
