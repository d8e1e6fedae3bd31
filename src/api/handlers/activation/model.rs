//! Activation codes: a random key paired with the user it activates.

use uuid::Uuid;

/// Column width of `activation_codes.key`.
pub const MAX_KEY_LENGTH: usize = 32;

/// A stored activation code. Codes are flipped to `activated` once and never
/// deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationCode {
    pub id: i64,
    pub key: String,
    pub user_id: Uuid,
    pub activated: bool,
    pub created: String,
    pub modified: String,
}

/// An activation code about to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewActivationCode {
    pub user_id: Uuid,
    pub key: String,
}

impl NewActivationCode {
    /// Code for `user_id` with a freshly generated key.
    #[must_use]
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            key: generate_key(),
        }
    }
}

/// Lowercase hex of a random UUIDv4, 32 characters.
#[must_use]
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Shape check done before any lookup.
#[must_use]
pub fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LENGTH && key.chars().all(|c| c.is_ascii_alphanumeric())
}
