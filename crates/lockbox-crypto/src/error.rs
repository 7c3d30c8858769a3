use thiserror::Error;

/// Errors from sealing or opening a secret.
///
/// Every failure while opening collapses into [`CipherError::Decrypt`]: a
/// bad encoding, a wrong key and a forged tag are indistinguishable to the
/// caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("key too short: {actual} bytes (need at least {expected})")]
    KeyTooShort { expected: usize, actual: usize },

    #[error("delimiter {0:?} collides with the base64 alphabet")]
    InvalidDelimiter(char),

    #[error("failed to encrypt data")]
    Encrypt,

    #[error("failed to decrypt data")]
    Decrypt,
}
