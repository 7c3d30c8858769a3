//! In-process store for tests and `database.url = "memory"`

use std::collections::BTreeMap;

use async_trait::async_trait;
use lockbox_core::{SecretId, UserId};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::model::{NewSecret, SecretRecord, SecretSummary, User};
use crate::{SecretStore, UserStore};

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    secrets: BTreeMap<SecretId, SecretRecord>,
    next_user: i64,
    next_secret: i64,
}

/// Volatile store backed by ordered maps behind a single `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.login == login).cloned())
    }

    async fn create_user(&self, login: &str, hash: &str) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.login == login) {
            return Err(StoreError::Conflict(format!("login {login:?} already exists")));
        }

        inner.next_user += 1;
        let user = User {
            id: UserId(inner.next_user),
            login: login.to_string(),
            hash: hash.to_string(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn list_secrets(&self, owner: UserId) -> StoreResult<Vec<SecretSummary>> {
        let inner = self.inner.read().await;
        Ok(inner
            .secrets
            .values()
            .filter(|s| s.owner == owner)
            .map(SecretSummary::from)
            .collect())
    }

    async fn read_secret(&self, id: SecretId, owner: UserId) -> StoreResult<Option<SecretRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .secrets
            .get(&id)
            .filter(|s| s.owner == owner)
            .cloned())
    }

    async fn write_secret(&self, secret: NewSecret) -> StoreResult<SecretId> {
        let mut inner = self.inner.write().await;
        inner.next_secret += 1;
        let id = SecretId(inner.next_secret);
        inner.secrets.insert(
            id,
            SecretRecord {
                id,
                name: secret.name,
                content_type: secret.content_type,
                owner: secret.owner,
                sealed: secret.sealed,
            },
        );
        Ok(id)
    }

    async fn delete_secret(&self, id: SecretId, owner: UserId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.secrets.get(&id) {
            Some(s) if s.owner == owner => {
                inner.secrets.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every backend must share.

    use super::*;
    use crate::Store;
    use lockbox_crypto::Sealed;

    fn sealed(tag: &str) -> Sealed {
        Sealed::from_parts(format!("nonce*{tag}-data"), format!("nonce*{tag}-key"))
    }

    fn new_secret(owner: UserId, name: &str) -> NewSecret {
        NewSecret {
            name: name.to_string(),
            content_type: "text".to_string(),
            owner,
            sealed: sealed(name),
        }
    }

    pub async fn users(store: &dyn Store) {
        assert!(store.find_user_by_login("alice").await.unwrap().is_none());

        let alice = store.create_user("alice", "hash-a").await.unwrap();
        let bob = store.create_user("bob", "hash-b").await.unwrap();
        assert_ne!(alice.id, bob.id);

        let found = store.find_user_by_login("alice").await.unwrap().unwrap();
        assert_eq!(found, alice);
        assert_eq!(found.hash, "hash-a");

        let dup = store.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(dup, StoreError::Conflict(_)), "got {dup:?}");
    }

    pub async fn owner_scoping(store: &dyn Store) {
        let a = UserId(1);
        let b = UserId(2);

        let id = store.write_secret(new_secret(a, "note")).await.unwrap();
        let other = store.write_secret(new_secret(b, "bobs")).await.unwrap();
        assert_ne!(id, other);

        let rec = store.read_secret(id, a).await.unwrap().unwrap();
        assert_eq!(rec.name, "note");
        assert_eq!(rec.owner, a);
        assert_eq!(rec.sealed, sealed("note"));

        // Another owner cannot see or remove it
        assert!(store.read_secret(id, b).await.unwrap().is_none());
        assert!(!store.delete_secret(id, b).await.unwrap());
        assert!(store.read_secret(id, a).await.unwrap().is_some());

        let listed = store.list_secrets(a).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].content_type, "text");

        assert!(store.delete_secret(id, a).await.unwrap());
        assert!(store.read_secret(id, a).await.unwrap().is_none());
        assert!(!store.delete_secret(id, a).await.unwrap());
        assert!(store.list_secrets(a).await.unwrap().is_empty());
        assert_eq!(store.list_secrets(b).await.unwrap().len(), 1);
    }

    pub async fn list_order(store: &dyn Store) {
        let owner = UserId(5);
        let first = store.write_secret(new_secret(owner, "one")).await.unwrap();
        let second = store.write_secret(new_secret(owner, "two")).await.unwrap();

        let names: Vec<_> = store
            .list_secrets(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        assert_eq!(names, vec![(first, "one".to_string()), (second, "two".to_string())]);
    }
}
