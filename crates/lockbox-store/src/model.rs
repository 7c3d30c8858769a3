use lockbox_core::{SecretId, UserId};
use lockbox_crypto::Sealed;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login: String,
    /// Argon2id PHC string
    pub hash: String,
}

/// A secret about to be written. The payload and wrapped key travel as one
/// [`Sealed`] value.
#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub content_type: String,
    pub owner: UserId,
    pub sealed: Sealed,
}

/// A stored secret, still sealed.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub id: SecretId,
    pub name: String,
    pub content_type: String,
    pub owner: UserId,
    pub sealed: Sealed,
}

/// Listing projection. Carries no ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSummary {
    pub id: SecretId,
    pub name: String,
    pub content_type: String,
    pub owner: UserId,
}

impl From<&SecretRecord> for SecretSummary {
    fn from(r: &SecretRecord) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            content_type: r.content_type.clone(),
            owner: r.owner,
        }
    }
}
