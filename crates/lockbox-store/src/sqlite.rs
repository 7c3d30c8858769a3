//! SQLite-backed store.
//!
//! Secrets are stored with their sealed payload in `value` and the wrapped
//! data key in `key`; both columns are written by the same INSERT.

use std::str::FromStr;

use async_trait::async_trait;
use lockbox_core::{SecretId, UserId};
use lockbox_crypto::Sealed;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::model::{NewSecret, SecretRecord, SecretSummary, User};
use crate::{SecretStore, UserStore};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        hash  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS secrets (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        name  TEXT NOT NULL,
        type  TEXT NOT NULL,
        value TEXT NOT NULL,
        key   TEXT NOT NULL,
        owner INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_secrets_owner ON secrets (owner)",
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and apply
    /// the schema.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:./lockbox.db")
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Internal(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!("database pool created");
        Ok(store)
    }

    /// A private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Internal(format!("invalid database URL: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        login: row.try_get("login")?,
        hash: row.try_get("hash")?,
    })
}

fn summary_from_row(row: &SqliteRow) -> StoreResult<SecretSummary> {
    Ok(SecretSummary {
        id: SecretId(row.try_get("id")?),
        name: row.try_get("name")?,
        content_type: row.try_get("type")?,
        owner: UserId(row.try_get("owner")?),
    })
}

fn record_from_row(row: &SqliteRow) -> StoreResult<SecretRecord> {
    Ok(SecretRecord {
        id: SecretId(row.try_get("id")?),
        name: row.try_get("name")?,
        content_type: row.try_get("type")?,
        owner: UserId(row.try_get("owner")?),
        sealed: Sealed::from_parts(row.try_get("value")?, row.try_get("key")?),
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    #[tracing::instrument(skip(self))]
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, login, hash FROM users WHERE login = ?")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    #[tracing::instrument(skip(self, hash))]
    async fn create_user(&self, login: &str, hash: &str) -> StoreResult<User> {
        let result = sqlx::query("INSERT INTO users (login, hash) VALUES (?, ?)")
            .bind(login)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("login {login:?} already exists"))
                }
                other => StoreError::Sqlx(other),
            })?;

        Ok(User {
            id: UserId(result.last_insert_rowid()),
            login: login.to_string(),
            hash: hash.to_string(),
        })
    }
}

#[async_trait]
impl SecretStore for SqliteStore {
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    async fn list_secrets(&self, owner: UserId) -> StoreResult<Vec<SecretSummary>> {
        let rows = sqlx::query("SELECT id, name, type, owner FROM secrets WHERE owner = ? ORDER BY id")
            .bind(owner.get())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(summary_from_row).collect()
    }

    #[tracing::instrument(skip(self), fields(id = %id, owner = %owner))]
    async fn read_secret(&self, id: SecretId, owner: UserId) -> StoreResult<Option<SecretRecord>> {
        let row = sqlx::query(
            "SELECT id, name, type, value, key, owner FROM secrets WHERE id = ? AND owner = ?",
        )
        .bind(id.get())
        .bind(owner.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[tracing::instrument(skip(self, secret), fields(owner = %secret.owner))]
    async fn write_secret(&self, secret: NewSecret) -> StoreResult<SecretId> {
        let (value, key) = secret.sealed.into_parts();
        let result = sqlx::query(
            "INSERT INTO secrets (name, type, value, key, owner) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(secret.name)
        .bind(secret.content_type)
        .bind(value)
        .bind(key)
        .bind(secret.owner.get())
        .execute(&self.pool)
        .await?;

        Ok(SecretId(result.last_insert_rowid()))
    }

    #[tracing::instrument(skip(self), fields(id = %id, owner = %owner))]
    async fn delete_secret(&self, id: SecretId, owner: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = ? AND owner = ?")
            .bind(id.get())
            .bind(owner.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conformance;

    #[tokio::test]
    async fn test_users() {
        conformance::users(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        conformance::owner_scoping(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_list_order() {
        conformance::list_order(&SqliteStore::in_memory().await.unwrap()).await;
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("lockbox.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        let user = store.create_user("alice", "hash").await.unwrap();
        store.close().await;

        let reopened = SqliteStore::connect(&url).await.unwrap();
        let found = reopened.find_user_by_login("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }
}
