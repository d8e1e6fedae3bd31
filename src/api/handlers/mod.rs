//! API handlers grouped by feature.

pub mod activation;
pub mod auth;
pub mod health;
pub mod notice;
pub mod profiles;
