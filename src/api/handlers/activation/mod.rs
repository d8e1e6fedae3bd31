//! Account activation by emailed key.
//!
//! A signup that requires activation creates an inactive user and, through the
//! [`ActivationMailer`] post-signup hook, an activation code whose key is sent
//! by email. Presenting the key flips the code to activated and the user to
//! active in one transaction. Codes do not expire and are never deleted.

mod mailer;
pub mod model;
pub mod routes;
mod storage;

pub use mailer::ActivationMailer;
pub use model::ActivationCode;
