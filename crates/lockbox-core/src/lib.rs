pub mod config;
pub mod error;
pub mod types;

pub use error::{LockboxError, LockboxResult};
pub use types::{SecretId, UserId};

/// Generated gRPC types and service traits (from lockbox.proto)
pub mod proto {
    tonic::include_proto!("lockbox");
}
