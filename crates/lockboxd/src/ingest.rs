//! Chunked upload state machine.
//!
//! ```text
//! Receiving ──end of stream──▶ Sealing ──stored──▶ Persisted
//!     │                           │
//!     └── error / cancel / cap ──▶ Aborted ◀── store or cipher failure
//! ```
//!
//! A client that resets its stream looks like a normal end of stream to the
//! decoder; the request's [`BodyHealth`] tells the two apart.
//!
//! The buffer is plaintext and is wiped on abort and on drop.

use std::pin::pin;

use lockbox_auth::{AuthenticatedCall, Interrupted};
use lockbox_core::proto::WriteRecordRequest;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::body::BodyHealth;
use crate::service::ServiceError;

/// Default cap on a single upload: 64 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_upload_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Receiving,
    Sealing,
    Persisted,
    Aborted,
}

/// A fully received upload, ready to be sealed.
pub struct Upload {
    pub name: String,
    pub content_type: String,
    pub data: Zeroizing<Vec<u8>>,
}

pub struct Ingest {
    state: IngestState,
    limits: IngestLimits,
    name: String,
    content_type: String,
    buffer: Zeroizing<Vec<u8>>,
    chunks: usize,
}

impl Ingest {
    pub fn new(limits: IngestLimits) -> Self {
        Self {
            state: IngestState::Receiving,
            limits,
            name: String::new(),
            content_type: String::new(),
            buffer: Zeroizing::new(Vec::new()),
            chunks: 0,
        }
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Bytes buffered so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Take one chunk. Name and type stick to the first non-empty value
    /// seen; data is appended in arrival order.
    pub fn accept(&mut self, chunk: WriteRecordRequest) -> Result<(), ServiceError> {
        if self.state != IngestState::Receiving {
            return Err(ServiceError::Internal(format!(
                "chunk received in state {:?}",
                self.state
            )));
        }

        if self.name.is_empty() && !chunk.name.is_empty() {
            self.name = chunk.name;
        }
        if self.content_type.is_empty() && !chunk.r#type.is_empty() {
            self.content_type = chunk.r#type;
        }

        let limit = self.limits.max_upload_bytes;
        if self.buffer.len().saturating_add(chunk.data.len()) > limit {
            self.abort();
            return Err(ServiceError::TooLarge { limit });
        }

        self.buffer.extend_from_slice(&chunk.data);
        self.chunks += 1;
        Ok(())
    }

    /// Drain `stream` into the buffer until it ends. Each wait for the next
    /// chunk is guarded by the call's cancellation and deadline. An end of
    /// stream caused by a broken request body aborts the upload.
    pub async fn receive<S>(
        &mut self,
        call: &AuthenticatedCall,
        stream: S,
        health: &BodyHealth,
    ) -> Result<(), ServiceError>
    where
        S: Stream<Item = Result<WriteRecordRequest, Status>>,
    {
        let mut stream = pin!(stream);

        loop {
            let next = match call.guard(stream.next()).await {
                Ok(next) => next,
                Err(interrupted) => {
                    self.abort();
                    return Err(interrupted.into());
                }
            };

            match next {
                Some(Ok(chunk)) => self.accept(chunk)?,
                Some(Err(status)) => {
                    warn!(
                        code = ?status.code(),
                        message = status.message(),
                        chunks = self.chunks,
                        "upload stream failed"
                    );
                    self.abort();
                    return Err(ServiceError::Transport(status.message().to_string()));
                }
                None if health.is_broken() => {
                    info!(
                        chunks = self.chunks,
                        bytes = self.received(),
                        "client went away mid-upload"
                    );
                    self.abort();
                    return Err(Interrupted::Cancelled.into());
                }
                None => break,
            }
        }

        debug!(chunks = self.chunks, bytes = self.received(), "upload received");
        Ok(())
    }

    /// End of stream: hand the buffered upload over for sealing.
    pub fn finish(&mut self) -> Result<Upload, ServiceError> {
        if self.state != IngestState::Receiving {
            return Err(ServiceError::Internal(format!(
                "cannot finish upload in state {:?}",
                self.state
            )));
        }

        self.state = IngestState::Sealing;
        Ok(Upload {
            name: std::mem::take(&mut self.name),
            content_type: std::mem::take(&mut self.content_type),
            data: std::mem::take(&mut self.buffer),
        })
    }

    pub fn persisted(&mut self) {
        if self.state == IngestState::Sealing {
            self.state = IngestState::Persisted;
        }
    }

    /// Drop everything received. Terminal.
    pub fn abort(&mut self) {
        if self.state == IngestState::Persisted {
            return;
        }
        self.buffer.zeroize();
        self.state = IngestState::Aborted;
    }
}
