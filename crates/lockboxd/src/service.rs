//! Business operations behind the gRPC surface.
//!
//! Every secret operation takes an [`AuthenticatedCall`]; the owner always
//! comes from the verified claim, never from the request.

use std::sync::Arc;

use lockbox_auth::{hash_password, verify_password, AuthError, AuthenticatedCall, Interrupted, TokenKeys};
use lockbox_core::SecretId;
use lockbox_crypto::{CipherError, EnvelopeCipher};
use lockbox_store::{NewSecret, SecretSummary, Store, StoreError};
use thiserror::Error;
use tokio_stream::Stream;
use tonic::Status;
use tracing::{debug, error, info, warn};

use crate::body::BodyHealth;
use crate::ingest::{Ingest, IngestLimits, Upload};
use lockbox_core::proto::WriteRecordRequest;

pub const RECORD_NOT_FOUND: &str = "record not found";
pub const USER_NOT_FOUND: &str = "user not found";
pub const BAD_CREDENTIALS: &str = "login or password incorrect";
pub const USER_EXISTS: &str = "this user exists";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("crypto: {0}")]
    Crypto(#[from] CipherError),

    #[error("store: failed to {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to receive chunk: {0}")]
    Transport(String),

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("call interrupted: {0:?}")]
    Interrupted(Interrupted),

    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<Interrupted> for ServiceError {
    fn from(i: Interrupted) -> Self {
        ServiceError::Interrupted(i)
    }
}

impl ServiceError {
    fn store(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| ServiceError::Store { op, source }
    }

    /// The message that crosses the trust boundary. Causes stay server-side.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Validation(m) | ServiceError::NotFound(m) | ServiceError::Conflict(m) => {
                m.clone()
            }
            ServiceError::Crypto(CipherError::Encrypt) => "failed to encrypt data".into(),
            ServiceError::Crypto(_) => "failed to decrypt data".into(),
            ServiceError::Store { op, .. } => format!("failed to {op}"),
            ServiceError::Transport(_) => "failed to receive chunk".into(),
            ServiceError::TooLarge { limit } => format!("upload exceeds {limit} bytes"),
            ServiceError::Interrupted(_) => "call interrupted".into(),
            ServiceError::Auth(_) | ServiceError::Internal(_) => "internal error".into(),
        }
    }

    /// Log the full error and turn it into the response `error` field, or
    /// into a gRPC status for cancellation and deadlines.
    pub fn into_reply(self, op: &str) -> Result<String, Status> {
        match self {
            ServiceError::Interrupted(i) => {
                info!(op, reason = ?i, "call interrupted");
                Err(i.into())
            }
            e @ (ServiceError::Validation(_)
            | ServiceError::NotFound(_)
            | ServiceError::Conflict(_)
            | ServiceError::TooLarge { .. }) => {
                warn!(op, error = %e, "request refused");
                Ok(e.client_message())
            }
            e => {
                error!(op, error = %e, "request failed");
                Ok(e.client_message())
            }
        }
    }
}

/// Owner-scoped secret operations over a store and an envelope cipher.
#[derive(Clone)]
pub struct SecretService {
    store: Arc<dyn Store>,
    cipher: Arc<EnvelopeCipher>,
    limits: IngestLimits,
}

impl SecretService {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<EnvelopeCipher>, limits: IngestLimits) -> Self {
        Self {
            store,
            cipher,
            limits,
        }
    }

    pub async fn list(&self, call: &AuthenticatedCall) -> Result<Vec<SecretSummary>, ServiceError> {
        call.guard(self.store.list_secrets(call.owner()))
            .await?
            .map_err(ServiceError::store("list records"))
    }

    /// Plaintext and type tag of a record owned by the caller. A record that
    /// is absent and one owned by someone else give the same `NotFound`.
    pub async fn read(
        &self,
        call: &AuthenticatedCall,
        id: SecretId,
    ) -> Result<(Vec<u8>, String), ServiceError> {
        let record = call
            .guard(self.store.read_secret(id, call.owner()))
            .await?
            .map_err(ServiceError::store("read record"))?
            .ok_or_else(|| ServiceError::NotFound(RECORD_NOT_FOUND.into()))?;

        let plaintext = self.cipher.open(&record.sealed)?;
        debug!(id = %id, owner = %call.owner(), bytes = plaintext.len(), "record opened");
        Ok((plaintext, record.content_type))
    }

    /// Seal and persist a fully received upload. Cancellation is honoured up
    /// to the insert; once the insert is issued it runs to completion so the
    /// caller never loses track of a stored record.
    pub async fn write(
        &self,
        call: &AuthenticatedCall,
        upload: Upload,
    ) -> Result<SecretId, ServiceError> {
        let sealed = self.cipher.seal(&upload.data)?;
        let secret = NewSecret {
            name: upload.name,
            content_type: upload.content_type,
            owner: call.owner(),
            sealed,
        };

        if call.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        let id = self
            .store
            .write_secret(secret)
            .await
            .map_err(ServiceError::store("write record"))?;
        info!(id = %id, owner = %call.owner(), "record written");
        Ok(id)
    }

    /// Receive a chunked upload and persist it as one record. Any failure
    /// before the record is written leaves nothing behind.
    pub async fn ingest<S>(
        &self,
        call: &AuthenticatedCall,
        stream: S,
        health: &BodyHealth,
    ) -> Result<SecretId, ServiceError>
    where
        S: Stream<Item = Result<WriteRecordRequest, Status>>,
    {
        let mut ingest = Ingest::new(self.limits);
        ingest.receive(call, stream, health).await?;

        let upload = ingest.finish()?;
        match self.write(call, upload).await {
            Ok(id) => {
                ingest.persisted();
                Ok(id)
            }
            Err(e) => {
                ingest.abort();
                Err(e)
            }
        }
    }

    pub async fn delete(&self, call: &AuthenticatedCall, id: SecretId) -> Result<(), ServiceError> {
        let removed = call
            .guard(self.store.delete_secret(id, call.owner()))
            .await?
            .map_err(ServiceError::store("delete record"))?;

        if !removed {
            return Err(ServiceError::NotFound(RECORD_NOT_FOUND.into()));
        }
        info!(id = %id, owner = %call.owner(), "record deleted");
        Ok(())
    }
}

/// Registration and login. These calls carry no bearer token.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
    keys: Arc<TokenKeys>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn Store>, keys: Arc<TokenKeys>) -> Self {
        Self { store, keys }
    }

    pub async fn register(&self, login: &str, password: String) -> Result<String, ServiceError> {
        if login.is_empty() || password.is_empty() {
            return Err(ServiceError::Validation(BAD_CREDENTIALS.into()));
        }

        let existing = self
            .store
            .find_user_by_login(login)
            .await
            .map_err(ServiceError::store("look up user"))?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(USER_EXISTS.into()));
        }

        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ServiceError::Internal(format!("hashing task failed: {e}")))??;

        let user = match self.store.create_user(login, &hash).await {
            Ok(user) => user,
            Err(StoreError::Conflict(_)) => return Err(ServiceError::Conflict(USER_EXISTS.into())),
            Err(e) => return Err(ServiceError::store("create user")(e)),
        };

        info!(user = %user.id, login = %user.login, "user registered");
        Ok(self.keys.issue(user.id, &user.login)?)
    }

    pub async fn login(&self, login: &str, password: String) -> Result<String, ServiceError> {
        let user = self
            .store
            .find_user_by_login(login)
            .await
            .map_err(ServiceError::store("look up user"))?
            .ok_or_else(|| ServiceError::NotFound(USER_NOT_FOUND.into()))?;

        let stored = user.hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| ServiceError::Internal(format!("verification task failed: {e}")))??;
        if !matches {
            return Err(ServiceError::Validation(BAD_CREDENTIALS.into()));
        }

        debug!(user = %user.id, "login succeeded");
        Ok(self.keys.issue(user.id, &user.login)?)
    }
}
