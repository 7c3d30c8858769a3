use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization metadata")]
    MissingCredentials,

    #[error("malformed authorization metadata")]
    MalformedCredentials,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is invalid or expired")]
    InvalidToken,

    #[error("token signing key is empty")]
    EmptyKey,

    #[error("failed to issue token: {0}")]
    Issue(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}
