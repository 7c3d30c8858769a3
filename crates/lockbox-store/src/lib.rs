//! lockbox-store: persistence for users and sealed secrets
//!
//! Every secret query is keyed by `(id, owner)`; there is no method that
//! reaches a secret by id alone.

pub mod error;
pub mod memory;
pub mod model;
pub mod sqlite;

use async_trait::async_trait;
use lockbox_core::{SecretId, UserId};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::{NewSecret, SecretRecord, SecretSummary, User};
pub use sqlite::SqliteStore;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by login. `Ok(None)` when no such user exists.
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;

    /// Create a user. Fails with [`StoreError::Conflict`] if the login is taken.
    async fn create_user(&self, login: &str, hash: &str) -> StoreResult<User>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Summaries of every secret owned by `owner`, in id order.
    async fn list_secrets(&self, owner: UserId) -> StoreResult<Vec<SecretSummary>>;

    /// The secret with `id` if and only if it belongs to `owner`.
    async fn read_secret(&self, id: SecretId, owner: UserId) -> StoreResult<Option<SecretRecord>>;

    /// Persist a new secret and return its assigned id.
    async fn write_secret(&self, secret: NewSecret) -> StoreResult<SecretId>;

    /// Delete the secret with `id` if it belongs to `owner`. Returns whether
    /// a row was removed.
    async fn delete_secret(&self, id: SecretId, owner: UserId) -> StoreResult<bool>;
}

/// A backend that stores both users and secrets.
pub trait Store: UserStore + SecretStore {}

impl<T: UserStore + SecretStore> Store for T {}
