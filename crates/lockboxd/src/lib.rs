//! lockboxd: secrets daemon
//!
//! - [`daemon`]: startup, TLS and graceful shutdown
//! - [`grpc`]: tonic services and the gated route table
//! - [`service`]: owner-scoped secret operations and identity
//! - [`ingest`]: chunked upload state machine
//! - [`body`]: request body watcher that spots client resets

pub mod body;
pub mod daemon;
pub mod grpc;
pub mod ingest;
pub mod service;

pub use daemon::{serve, Vault};
pub use ingest::IngestLimits;
pub use service::ServiceError;
